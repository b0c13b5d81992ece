use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request body for login.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub login_identifier: Option<String>,
    pub password: Option<String>,
}

/// Text fields of the multipart registration form, as received.
#[derive(Debug, Clone, Default)]
pub struct RegisterForm {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub confirm_email: Option<String>,
    pub password: Option<String>,
    pub confirm_password: Option<String>,
    pub date_of_birth: Option<String>,
    pub accepts_publicity: Option<String>,
}

impl RegisterForm {
    /// Stores a text field by its form name. Returns false for names the form does not know.
    pub fn set(&mut self, name: &str, value: String) -> bool {
        let slot = match name {
            "firstName" => &mut self.first_name,
            "lastName" => &mut self.last_name,
            "username" => &mut self.username,
            "email" => &mut self.email,
            "confirmEmail" => &mut self.confirm_email,
            "password" => &mut self.password,
            "confirmPassword" => &mut self.confirm_password,
            "dateOfBirth" => &mut self.date_of_birth,
            "acceptsPublicity" => &mut self.accepts_publicity,
            _ => return false,
        };
        *slot = Some(value);
        true
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Returned once, on successful registration. `recovery_pin` is the only time the plaintext PIN leaves the server.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub message: String,
    pub user_id: Uuid,
    #[serde(rename = "recoveryPIN")]
    pub recovery_pin: String,
}
