//! Request routing for the public API.

use hyper::Method;

/// Prefix shared by every API route.
pub const SESSIONS_PREFIX: &str = "/api/v1/sessions/";

/// A matched route. Path segments borrow from the request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route<'a> {
    /// `POST {prefix}{id}/expose`
    Expose { session_id: &'a str },
    /// `GET {prefix}{id}/expose`
    ListExposed { session_id: &'a str },
    /// `DELETE {prefix}{id}/expose`
    Cleanup { session_id: &'a str },
    /// `DELETE {prefix}{id}/expose/{port}`
    Unexpose { session_id: &'a str, port: &'a str },
    /// `ANY {prefix}{id}/proxy/{port}[/rest]`
    ///
    /// `path` is the remainder after the port, `""` when there is none.
    Proxy {
        session_id: &'a str,
        port: &'a str,
        path: &'a str,
    },
    /// Known path, wrong method.
    MethodNotAllowed,
    NotFound,
}

/// Match a request against the API routes.
pub fn match_route<'a>(method: &Method, path: &'a str) -> Route<'a> {
    let Some(rest) = path.strip_prefix(SESSIONS_PREFIX) else {
        return Route::NotFound;
    };

    let Some((session_id, rest)) = rest.split_once('/') else {
        return Route::NotFound;
    };
    if session_id.is_empty() {
        return Route::NotFound;
    }

    let (action, tail) = match rest.split_once('/') {
        Some((action, tail)) => (action, Some(tail)),
        None => (rest, None),
    };

    match action {
        "expose" => match tail {
            None | Some("") => match *method {
                Method::POST => Route::Expose { session_id },
                Method::GET => Route::ListExposed { session_id },
                Method::DELETE => Route::Cleanup { session_id },
                _ => Route::MethodNotAllowed,
            },
            Some(port) if !port.contains('/') => {
                if *method == Method::DELETE {
                    Route::Unexpose { session_id, port }
                } else {
                    Route::MethodNotAllowed
                }
            }
            Some(_) => Route::NotFound,
        },
        "proxy" => {
            let Some(tail) = tail else {
                return Route::NotFound;
            };
            let (port, path) = match tail.find('/') {
                Some(idx) => tail.split_at(idx),
                None => (tail, ""),
            };
            if port.is_empty() {
                return Route::NotFound;
            }
            Route::Proxy {
                session_id,
                port,
                path,
            }
        }
        _ => Route::NotFound,
    }
}
