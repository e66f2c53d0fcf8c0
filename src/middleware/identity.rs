use axum::{
    extract::Request,
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const USER_NAME_HEADER: &str = "x-user-name";

/// Identity forwarded by the upstream auth layer. Tokens are validated there,
/// not here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub email: Option<String>,
    pub username: Option<String>,
}

/// The caller of the current request; `None` for anonymous requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caller(pub Option<Identity>);

impl Caller {
    pub fn owner_id(&self) -> Option<&str> {
        self.0.as_ref().map(|i| i.id.as_str())
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        Caller(read(USER_ID_HEADER).map(|id| Identity {
            id,
            email: read(USER_EMAIL_HEADER),
            username: read(USER_NAME_HEADER),
        }))
    }
}

pub async fn identity_middleware(mut req: Request, next: Next) -> Response {
    let caller = Caller::from_headers(req.headers());
    req.extensions_mut().insert(caller);
    next.run(req).await
}
