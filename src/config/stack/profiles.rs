use super::services::dedupe_preserving_order;
use serde::Deserialize;
use std::collections::BTreeSet;

/// Named preset selecting a service subset. `extends` pulls in another profile's services first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileDefinition {
    pub name: String,
    pub description: Option<String>,
    pub extends: Option<String>,
    pub services: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawProfile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    extends: Option<String>,
    #[serde(default)]
    services: Vec<String>,
}

pub(crate) fn parse_profiles(
    raw: Vec<RawProfile>,
    errors: &mut Vec<String>,
) -> Vec<ProfileDefinition> {
    let mut seen = BTreeSet::new();
    let mut profiles = Vec::with_capacity(raw.len());

    for (index, raw_profile) in raw.into_iter().enumerate() {
        let name = match raw_profile.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                errors.push(format!("profiles[{index}].name must be a non-empty string"));
                continue;
            }
        };

        if !seen.insert(name.clone()) {
            errors.push(format!("profile `{name}` is declared more than once"));
            continue;
        }

        let extends = raw_profile
            .extends
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        if extends.as_deref() == Some(name.as_str()) {
            errors.push(format!("profile `{name}` cannot extend itself"));
            continue;
        }

        let services = dedupe_preserving_order(raw_profile.services);
        if services.is_empty() && extends.is_none() {
            errors.push(format!(
                "profile `{name}` must list at least one service or extend another profile"
            ));
        }

        profiles.push(ProfileDefinition {
            name,
            description: raw_profile.description,
            extends,
            services,
        });
    }

    profiles
}
