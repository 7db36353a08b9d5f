use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Shared-secret auth: every user logs in with the server password.
#[derive(Debug)]
pub struct VacancyAuthSource {
    password: String,
}

impl VacancyAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for VacancyAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        tracing::debug!(user = login.user().unwrap_or("-"), "password login");
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
