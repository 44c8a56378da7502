use super::found;
use axum::response::Response;

#[utoipa::path(
    get,
    path= "/",
    responses (
        (status = 302, description = "Redirect to the login page"),
    ),
    tag= "sesame"
)]
pub async fn home() -> Response {
    found("/login")
}
