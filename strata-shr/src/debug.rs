//  DEBUG.rs
//    by Lut99
//
//  Created:
//    06 Feb 2023, 11:06:40
//  Last edited:
//    14 Feb 2023, 16:21:08
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements a few debug tools.
//

use std::fmt::{Debug, Display, Formatter, Result as FResult};


/***** LIBRARY *****/
/// Defines a struct that can format a large block of text neatly.
pub struct BlockFormatter<S1> {
    /// Reference to the thing to format.
    to_fmt : S1,
}
impl<S1> BlockFormatter<S1> {
    /// Constructor for the BlockFormatter.
    ///
    /// # Arguments
    /// - `to_fmt`: The thing to format.
    ///
    /// # Returns
    /// A new BlockFormatter instance.
    #[inline]
    pub fn new(to_fmt: S1) -> Self {
        Self {
            to_fmt,
        }
    }
}
impl<S1> Display for BlockFormatter<S1>
where
    S1: Display,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        // Write stdout, with lines to capture it
        writeln!(f, "{}\n{}\n{}",
            (0..80).map(|_| '-').collect::<String>(),
            self.to_fmt,
            (0..80).map(|_| '-').collect::<String>(),
        )?;

        // Done
        Ok(())
    }
}



/// Defines a struct that implements a special type of Debug for the given EnumDebug-type.
pub struct EnumDebugFormatter<'a, T: ?Sized> {
    reference : &'a T,
}
impl<'a, T> Debug for EnumDebugFormatter<'a, T>
where
    T: EnumDebug,
{
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        write!(f, "{}::", std::any::type_name::<T>())?;
        self.reference.fmt_name(f)
    }
}
impl<'a, T> Display for EnumDebugFormatter<'a, T>
where
    T: EnumDebug,
{
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        self.reference.fmt_name(f)
    }
}



/// Defines a really quick trait that allows the printing of node names only.
pub trait EnumDebug {
    /// Writes the name of this node to the given formatter.
    ///
    /// # Arguments
    /// - `f`: The Formatter to write to.
    ///
    /// # Errors
    /// This function errors if it failed to write to the given formatter.
    fn fmt_name(&self, f: &mut Formatter<'_>) -> FResult;



    /// Function that returns a EnumDebugFormatter for the type implementing this.
    ///
    /// # Returns
    /// A new EnumDebugFormatter that implements Debug and can thus write to stdout.
    #[inline]
    fn variant(&self) -> EnumDebugFormatter<'_, Self> {
        EnumDebugFormatter {
            reference : self,
        }
    }
}
