//  STACK.rs
//    by Lut99
//
//  Created:
//    06 Feb 2023, 10:16:02
//  Last edited:
//    27 Mar 2023, 14:02:18
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines the model types around published stacks: the owning user,
//!   the frame that was pushed and the attachment that carries the
//!   application bundle.
//

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};


/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;

    /// A frame with a complete python section resolves to "major.minor".
    #[test]
    fn frame_python_version_present() {
        let frame: Frame = Frame::new("latest", serde_json::from_str(r#"{ "python": { "major": 3, "minor": 8 } }"#).unwrap());
        assert_eq!(frame.python_version(), Some("3.8".into()));
    }

    /// A frame without a python section (old clients) resolves to nothing.
    #[test]
    fn frame_python_version_missing() {
        let frame: Frame = Frame::new("latest", Map::new());
        assert_eq!(frame.python_version(), None);

        // A python section that is not an object is ignored as well
        let frame: Frame = Frame::new("latest", serde_json::from_str(r#"{ "python": "3.8" }"#).unwrap());
        assert_eq!(frame.python_version(), None);
    }

    /// An attachment with a function section resolves to a kind/data pair; partial sections do not.
    #[test]
    fn attachment_function() {
        let attachment: Attachment = Attachment::new("alice/app/c4ff3", serde_json::from_str(r#"{ "function": { "type": "source", "data": "app.handlers.render" } }"#).unwrap());
        let function: AppFunction = attachment.function().unwrap();
        assert_eq!(function.kind, "source");
        assert_eq!(function.data, "app.handlers.render");

        let attachment: Attachment = Attachment::new("alice/app/c4ff3", serde_json::from_str(r#"{ "function": { "type": "source" } }"#).unwrap());
        assert!(attachment.function().is_none());
    }
}





/***** LIBRARY *****/
/// Defines the user on whose behalf an application is executed.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct User {
    /// The name of the user.
    pub name  : String,
    /// The user's API token, handed to the executor process so it can call back into the server.
    pub token : String,
}

impl User {
    /// Constructor for the User.
    ///
    /// # Arguments
    /// - `name`: The name of the user.
    /// - `token`: The user's API token.
    ///
    /// # Returns
    /// A new User instance.
    #[inline]
    pub fn new(name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            name  : name.into(),
            token : token.into(),
        }
    }
}



/// Defines a single pushed revision ("frame") of a stack.
///
/// Only the parts of the frame that the execution engine cares about are modelled here; the rest
/// of the frame lives in the relational store, which is not our concern.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Frame {
    /// The identifier of the frame within its stack.
    pub id       : String,
    /// The free-form settings map pushed by the client.
    pub settings : Map<String, Value>,
}

impl Frame {
    /// Constructor for the Frame.
    ///
    /// # Arguments
    /// - `id`: The identifier of the frame within its stack.
    /// - `settings`: The free-form settings map pushed by the client.
    ///
    /// # Returns
    /// A new Frame instance.
    #[inline]
    pub fn new(id: impl Into<String>, settings: Map<String, Value>) -> Self {
        Self {
            id : id.into(),
            settings,
        }
    }



    /// Returns the minor Python version this frame was pushed with, as `"<major>.<minor>"`.
    ///
    /// # Returns
    /// The version string, or `None` if the client did not declare one (i.e., predates the
    /// version handshake).
    pub fn python_version(&self) -> Option<String> {
        let python: &Map<String, Value> = self.settings.get("python")?.as_object()?;
        Some(format!("{}.{}", python.get("major")?, python.get("minor")?))
    }
}



/// Defines the attachment that carries an application bundle.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Attachment {
    /// The stable path of the attachment's payload in the file store. Doubles as the key under
    /// which the bundle is unpacked and its worker is registered.
    pub file_path : String,
    /// The free-form settings map pushed by the client.
    pub settings  : Map<String, Value>,
}

impl Attachment {
    /// Constructor for the Attachment.
    ///
    /// # Arguments
    /// - `file_path`: The stable path of the attachment's payload in the file store.
    /// - `settings`: The free-form settings map pushed by the client.
    ///
    /// # Returns
    /// A new Attachment instance.
    #[inline]
    pub fn new(file_path: impl Into<String>, settings: Map<String, Value>) -> Self {
        Self {
            file_path : file_path.into(),
            settings,
        }
    }



    /// Returns the application function declared by this attachment, if any.
    ///
    /// # Returns
    /// An AppFunction describing how the driver should resolve the user's function, or `None` if
    /// the attachment does not declare one (both the kind and the data must be present).
    pub fn function(&self) -> Option<AppFunction> {
        let function: &Map<String, Value> = self.settings.get("function")?.as_object()?;
        let kind: &str = function.get("type")?.as_str()?;
        let data: &str = function.get("data")?.as_str()?;
        Some(AppFunction {
            kind : kind.into(),
            data : data.into(),
        })
    }
}



/// Defines how the executor driver resolves the user's application function.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AppFunction {
    /// The kind of reference (e.g., `source` for a module path).
    #[serde(rename = "type")]
    pub kind : String,
    /// The kind-specific payload (e.g., the dotted module path).
    pub data : String,
}
