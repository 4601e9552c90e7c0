use http::Method;

/// Only `GET` responses are cached; every other method is forwarded untouched.
pub fn is_cacheable(method: &Method) -> bool {
    *method == Method::GET
}
