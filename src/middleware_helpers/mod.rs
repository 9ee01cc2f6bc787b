pub mod api_key;
pub mod request_id;
pub mod timeout;

pub use api_key::{api_key_middleware, ApiKeyGuard, API_KEY_HEADER};
pub use request_id::{request_id_middleware, REQUEST_ID_HEADER};
pub use timeout::request_timeout_middleware;
