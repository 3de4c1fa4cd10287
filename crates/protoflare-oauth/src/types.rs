mod callback;
mod client_metadata;
mod request;
mod response;

pub use self::callback::*;
pub use self::client_metadata::*;
pub use self::request::*;
pub use self::response::*;
