//! Request/response types for auth endpoints.

use serde::{Deserialize, Serialize};

use crate::auth::{gateway::Credentials, principal::Profile};

#[derive(Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl From<LoginRequest> for Credentials {
    fn from(request: LoginRequest) -> Self {
        Self {
            username: request.username.trim().to_string(),
            password: request.password,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct WebLoginResponse {
    pub data: Profile,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct MobileLoginResponse {
    pub data: Profile,
    pub access_token: String,
    pub refresh_token: String,
}
