mod body;
mod codec;
mod dispatch;
mod pipeline;
mod respond;
mod server;

pub use respond::respond_with_access_log;
pub use server::handle_http;
