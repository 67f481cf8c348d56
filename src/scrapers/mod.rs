pub mod backoff;
pub mod decode;
pub mod fetcher;
pub mod parser;
pub mod session;
pub mod traits;
pub mod types;

pub use fetcher::{FetchError, Fetcher};
pub use parser::ListingParser;
pub use session::{SessionError, SessionManager};
pub use traits::{Sleeper, Transport};
