//! JSON bodies returned by the API.
//!
//! Field names follow the wire format (snake_case). Optional fields default
//! to `None` so sparse records still decode.

use serde::Deserialize;

/// One element of `GET /photos`.
#[derive(Debug, Clone, Deserialize)]
pub struct PhotoRecord {
    pub id: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub urls: PhotoUrls,
    #[serde(default)]
    pub liked_by_user: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoUrls {
    pub thumb: String,
    pub full: String,
}

/// `POST /oauth/token` response. No Debug: the body is a credential.
#[derive(Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
}

/// `GET /me`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileRecord {
    pub username: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
}

/// `GET /users/{username}`; only the avatar is used.
#[derive(Debug, Clone, Deserialize)]
pub struct UserRecord {
    pub profile_image: ProfileImage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileImage {
    pub small: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_photo_record_sparse_fields() {
        let json = r##"{
            "id": "abc",
            "width": 4000,
            "height": 3000,
            "urls": { "thumb": "https://img/t", "full": "https://img/f", "raw": "https://img/r" },
            "color": "#ffffff"
        }"##;
        let record: PhotoRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, "abc");
        assert!(record.created_at.is_none());
        assert!(record.description.is_none());
        assert!(!record.liked_by_user);
    }

    #[test]
    fn test_photo_record_null_description() {
        let json = r#"{
            "id": "abc", "width": 1, "height": 1,
            "created_at": "2016-05-03T11:00:28-04:00",
            "description": null,
            "urls": { "thumb": "t", "full": "f" },
            "liked_by_user": true
        }"#;
        let record: PhotoRecord = serde_json::from_str(json).unwrap();
        assert!(record.description.is_none());
        assert!(record.liked_by_user);
    }

    #[test]
    fn test_profile_record_optional_names() {
        let record: ProfileRecord = serde_json::from_str(r#"{"username":"jdoe"}"#).unwrap();
        assert_eq!(record.username, "jdoe");
        assert!(record.first_name.is_none());
        assert!(record.bio.is_none());
    }

    #[test]
    fn test_user_record_avatar() {
        let json = r#"{"profile_image":{"small":"https://a/s","medium":"https://a/m"}}"#;
        let record: UserRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.profile_image.small, "https://a/s");
    }
}
