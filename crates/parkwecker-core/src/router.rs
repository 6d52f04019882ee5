use crate::http::Request;

/// Where an intercepted request goes. Decided synchronously, before any
/// asynchronous work, so pass-through traffic costs nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Not intercepted; default network handling applies.
    PassThrough,
    /// Top-level page load: network first, shell fallback.
    Navigation,
    /// Any other GET: cache first, network fallback.
    Asset,
}

impl Route {
    pub fn classify(request: &Request) -> Self {
        if !request.is_get() {
            Route::PassThrough
        } else if request.is_navigation() {
            Route::Navigation
        } else {
            Route::Asset
        }
    }

    pub fn is_intercepted(self) -> bool {
        self != Route::PassThrough
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RequestMode;
    use reqwest::Method;

    fn request(method: Method, mode: RequestMode) -> Request {
        Request::new(method, "http://localhost:8080/".parse().unwrap(), mode)
    }

    #[test]
    fn test_non_get_passes_through() {
        for method in [Method::POST, Method::PUT, Method::DELETE, Method::HEAD] {
            assert_eq!(
                Route::classify(&request(method.clone(), RequestMode::Cors)),
                Route::PassThrough
            );
            // Mode does not matter for non-GET
            assert_eq!(
                Route::classify(&request(method, RequestMode::Navigate)),
                Route::PassThrough
            );
        }
    }

    #[test]
    fn test_navigation_get() {
        let route = Route::classify(&request(Method::GET, RequestMode::Navigate));
        assert_eq!(route, Route::Navigation);
        assert!(route.is_intercepted());
    }

    #[test]
    fn test_other_get_modes_are_assets() {
        for mode in [RequestMode::NoCors, RequestMode::Cors, RequestMode::SameOrigin] {
            assert_eq!(Route::classify(&request(Method::GET, mode)), Route::Asset);
        }
    }
}
