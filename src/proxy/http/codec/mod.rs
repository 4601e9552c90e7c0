mod headers;
mod line;
mod request;

pub(crate) use headers::Http1HeaderAccumulator;
pub(crate) use line::read_line_with_timeout;
pub(crate) use request::{Http1RequestHead, read_http1_request_head};
