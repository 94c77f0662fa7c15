//! Resource models served by the API.

use std::sync::Arc;

use crate::resource::{FieldType, ResourceSchema, SchemaError};

pub fn prototypes() -> Result<ResourceSchema, SchemaError> {
    ResourceSchema::builder("prototypes")
        .required("name", FieldType::String)
        .required("description", FieldType::String)
        .optional("url", FieldType::Url)
        .optional("email", FieldType::Email)
        .build()
}

pub fn users() -> Result<ResourceSchema, SchemaError> {
    let token = ResourceSchema::builder("token")
        .optional("accessToken", FieldType::String)
        .optional("expiresIn", FieldType::Integer)
        .optional("refreshToken", FieldType::String)
        .optional("idToken", FieldType::String)
        .build()?;
    let otp = ResourceSchema::builder("OTP")
        .optional("secret", FieldType::String)
        .optional("code", FieldType::String)
        .optional("expiresIn", FieldType::Integer)
        .build()?;
    let qr = ResourceSchema::builder("QRcode")
        .optional("url", FieldType::Url)
        .optional("payload", FieldType::String)
        .optional("expiration", FieldType::Timestamp)
        .build()?;

    ResourceSchema::builder("users")
        .required("uid", FieldType::String)
        .required("displayName", FieldType::String)
        .required("email", FieldType::Email)
        .optional("photoURL", FieldType::Url)
        .required("providerId", FieldType::String)
        .optional("UserAgent", FieldType::String)
        .required("hosts", FieldType::list_of(FieldType::String))
        .optional("token", FieldType::Object(token))
        .optional("OTP", FieldType::Object(otp))
        .optional("QRcode", FieldType::Object(qr))
        .index("users_by_uid", &["uid"])
        .index("users_by_email", &["email"])
        .build()
}

/// Every schema mounted at startup, in route order.
pub fn all() -> Result<Vec<Arc<ResourceSchema>>, SchemaError> {
    Ok(vec![Arc::new(users()?), Arc::new(prototypes()?)])
}
