use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::client::RequestOptions;
use super::session::Session;
use crate::errors::TouristError;

/// A guide's own profile, as returned to the guide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuideProfile {
    pub id: i64,
    pub user_id: i64,
    pub bio: Option<String>,
    pub experience_years: Option<u32>,
    pub city: Option<String>,
    pub country: Option<String>,
    /// Comma separated, e.g. "Japanese, English".
    pub languages: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A guide profile as listed to everyone, with the owner's name joined in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuideProfilePublic {
    pub id: i64,
    pub user_id: i64,
    pub bio: Option<String>,
    pub experience_years: Option<u32>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub languages: Option<String>,
    pub guide_name: String,
    pub guide_email: Option<String>,
    pub member_since: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl GuideProfilePublic {
    pub fn languages(&self) -> Vec<&str> {
        self.languages
            .as_deref()
            .map(|langs| {
                langs
                    .split(',')
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Body of guide profile create and update requests. Unset fields are left out.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuideProfileInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experience_years: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub languages: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TouristProfile {
    pub id: i64,
    pub user_id: i64,
    pub nationality: Option<String>,
    pub preferred_language: Option<String>,
    pub travel_interests: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TouristProfileInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nationality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub travel_interests: Option<String>,
}

/// Profile endpoints. Browsing guides is public; everything else needs a session.
#[derive(Debug, Clone)]
pub struct Profiles {
    session: Arc<Session>,
}

impl Profiles {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    fn authed<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<T, TouristError> {
        self.session.require_token()?;
        self.session.request_json(endpoint, options)
    }

    /// All guides, for browsing. No session needed.
    pub fn list_guides(&self) -> Result<Vec<GuideProfilePublic>, TouristError> {
        self.session
            .api()
            .request_json("/profiles/guides", RequestOptions::get(), None)
    }

    /// A single guide by profile id. No session needed.
    pub fn guide_profile(&self, profile_id: i64) -> Result<GuideProfilePublic, TouristError> {
        self.session.api().request_json(
            &format!("/profiles/guide/profile/{}", profile_id),
            RequestOptions::get(),
            None,
        )
    }

    /// A guide's profile by the guide's user id.
    pub fn guide_profile_by_user(&self, user_id: i64) -> Result<GuideProfile, TouristError> {
        self.authed(&format!("/profiles/guide/{}", user_id), RequestOptions::get())
    }

    pub fn create_guide_profile(
        &self,
        profile: &GuideProfileInput,
    ) -> Result<GuideProfile, TouristError> {
        let created: GuideProfile =
            self.authed("/profiles/guide", RequestOptions::post(profile)?)?;
        log::info!("created guide profile {}", created.id);
        Ok(created)
    }

    pub fn my_guide_profile(&self) -> Result<GuideProfile, TouristError> {
        self.authed("/profiles/guide/me", RequestOptions::get())
    }

    pub fn update_guide_profile(
        &self,
        profile: &GuideProfileInput,
    ) -> Result<GuideProfile, TouristError> {
        self.authed("/profiles/guide/me", RequestOptions::put(profile)?)
    }

    pub fn create_tourist_profile(
        &self,
        profile: &TouristProfileInput,
    ) -> Result<TouristProfile, TouristError> {
        let created: TouristProfile =
            self.authed("/profiles/tourist", RequestOptions::post(profile)?)?;
        log::info!("created tourist profile {}", created.id);
        Ok(created)
    }

    pub fn my_tourist_profile(&self) -> Result<TouristProfile, TouristError> {
        self.authed("/profiles/tourist/me", RequestOptions::get())
    }

    pub fn update_tourist_profile(
        &self,
        profile: &TouristProfileInput,
    ) -> Result<TouristProfile, TouristError> {
        self.authed("/profiles/tourist/me", RequestOptions::put(profile)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_languages() {
        let profile: GuideProfilePublic = serde_json::from_value(serde_json::json!({
            "id": 3,
            "user_id": 7,
            "bio": null,
            "experience_years": 4,
            "city": "Kyoto",
            "country": "Japan",
            "languages": "Japanese, English,, French",
            "guide_name": "Aiko Tanaka",
            "guide_email": "aiko@example.com",
            "member_since": "2024-03-01T09:00:00Z",
            "created_at": "2024-03-02T09:00:00Z",
            "updated_at": null
        }))
        .unwrap();

        assert_eq!(profile.languages(), vec!["Japanese", "English", "French"]);
    }
}
