use axum::{Extension, Json, extract::State};
use tracing::info;

use parley_db::models::ProfilePatch;
use parley_types::api::{ProfilePatchRequest, ProfileResponse};

use crate::error::ApiError;
use crate::middleware::Caller;
use crate::state::{AppState, with_db};

const DISPLAY_NAME_MAX_CHARS: usize = 64;
const AVATAR_URL_MAX_CHARS: usize = 2048;

fn into_patch(req: ProfilePatchRequest) -> Result<ProfilePatch, ApiError> {
    let display_name = match req.display_name {
        Some(name) => {
            let name = name.trim();
            if name.is_empty() || name.chars().count() > DISPLAY_NAME_MAX_CHARS {
                return Err(ApiError::validation("display_name must be 1 to 64 characters"));
            }
            Some(name.to_string())
        }
        None => None,
    };

    let avatar_url = match req.avatar_url {
        Some(Some(url)) => {
            let url = url.trim();
            if url.chars().count() > AVATAR_URL_MAX_CHARS {
                return Err(ApiError::validation("avatar_url is too long"));
            }
            // A blank url clears the avatar
            Some((!url.is_empty()).then(|| url.to_string()))
        }
        other => other,
    };

    Ok(ProfilePatch {
        display_name,
        avatar_url,
    })
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<ProfilePatchRequest>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let patch = into_patch(req)?;
    let user_id = caller.user_id;
    let changed = !patch.is_empty();

    let profile = with_db(&state, move |db| db.update_profile(user_id, &patch))
        .await?
        .ok_or(ApiError::NotFound("user"))?;

    if changed {
        info!(user_id, "Profile updated");
    }
    Ok(Json(ProfileResponse { user_id, profile }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(json: &str) -> ProfilePatchRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn display_name_is_trimmed_and_bounded() {
        let patch = into_patch(req(r#"{"display_name":"  Ada  "}"#)).unwrap();
        assert_eq!(patch.display_name.as_deref(), Some("Ada"));
        assert_eq!(patch.avatar_url, None);

        assert!(into_patch(req(r#"{"display_name":"   "}"#)).is_err());
        let long = format!(r#"{{"display_name":"{}"}}"#, "x".repeat(65));
        assert!(into_patch(req(&long)).is_err());
    }

    #[test]
    fn avatar_can_be_set_or_cleared() {
        let set = into_patch(req(r#"{"avatar_url":"/media/a.png"}"#)).unwrap();
        assert_eq!(set.avatar_url, Some(Some("/media/a.png".to_string())));

        let cleared = into_patch(req(r#"{"avatar_url":null}"#)).unwrap();
        assert_eq!(cleared.avatar_url, Some(None));

        let blank = into_patch(req(r#"{"avatar_url":"  "}"#)).unwrap();
        assert_eq!(blank.avatar_url, Some(None));

        assert!(into_patch(req("{}")).unwrap().is_empty());
    }
}
