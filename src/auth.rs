use actix_web::{post, web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::db::Store;
use crate::error::{ApiError, ApiResult};
use crate::schemas::User;

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Deserialize)]
pub struct SignupRequest {
    #[serde(rename = "uName")]
    u_name: String,
    password: String,
    goal: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(rename = "uName")]
    u_name: String,
    password: String,
}

#[post("/signup")]
pub async fn signup(
    store: web::Data<Store>,
    json: web::Json<SignupRequest>,
) -> ApiResult<HttpResponse> {
    let req = json.into_inner();
    if req.u_name.trim().is_empty() || req.password.is_empty() || req.goal.trim().is_empty() {
        return Err(ApiError::Validation("All fields required.".into()));
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::Validation("Password too short.".into()));
    }
    if store.find_user(&req.u_name).await?.is_some() {
        return Err(ApiError::Conflict("Username exists.".into()));
    }

    let hashed = bcrypt::hash(&req.password, bcrypt::DEFAULT_COST)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    store
        .insert_user(&User {
            u_name: req.u_name.clone(),
            password: hashed,
            goal: req.goal,
            goal_id: None,
        })
        .await?;

    info!(user = %req.u_name, "user created");
    Ok(HttpResponse::Created().json(json!({ "message": "User created." })))
}

#[post("/login")]
pub async fn login(
    store: web::Data<Store>,
    json: web::Json<LoginRequest>,
) -> ApiResult<HttpResponse> {
    let req = json.into_inner();

    // Unknown user and wrong password take the same path out, so the
    // response never reveals which one it was.
    let user = store
        .find_user(&req.u_name)
        .await?
        .ok_or(ApiError::AuthFailure)?;
    let valid = bcrypt::verify(&req.password, &user.password).unwrap_or(false);
    if !valid {
        return Err(ApiError::AuthFailure);
    }

    Ok(HttpResponse::Ok().json(json!({ "message": "Login successful.", "uName": user.u_name })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_hash_verifies_and_differs_from_plain() {
        let hash = bcrypt::hash("hunter2!", 4).unwrap();
        assert_ne!(hash, "hunter2!");
        assert!(bcrypt::verify("hunter2!", &hash).unwrap());
        assert!(!bcrypt::verify("hunter3!", &hash).unwrap());
    }

    #[test]
    fn signup_request_uses_original_field_names() {
        let req: SignupRequest = serde_json::from_str(
            r#"{"uName":"ada","password":"secret1","goal":"save for a laptop"}"#,
        )
        .unwrap();
        assert_eq!(req.u_name, "ada");
        assert_eq!(req.goal, "save for a laptop");
    }
}
