//! Recipient resolution: targeting descriptor to concrete user ids.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::database::models::{EventDbModel, UserDbModel};
use crate::database::repositories::DirectoryRepository;
use crate::domain::{Channel, RecipientTarget, SkippedRecipient};
use crate::{Error, Result};

pub const SKIP_NOT_IN_ORGANIZATION: &str = "not in organization";
pub const SKIP_NO_PHONE: &str = "no phone number for sms";
pub const SKIP_NO_EMAIL: &str = "no email address for email";

/// Resolved recipient set.
///
/// `skipped` lists ids outside the organization and users missing a contact
/// detail for a requested channel. The latter stay in `user_ids`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Resolution {
    pub user_ids: BTreeSet<String>,
    pub skipped: Vec<SkippedRecipient>,
    #[serde(skip)]
    pub users: BTreeMap<String, UserDbModel>,
}

impl Resolution {
    pub fn user_id_list(&self) -> Vec<String> {
        self.user_ids.iter().cloned().collect()
    }
}

pub struct RecipientResolver {
    directory: Arc<dyn DirectoryRepository>,
}

impl RecipientResolver {
    pub fn new(directory: Arc<dyn DirectoryRepository>) -> Self {
        Self { directory }
    }

    pub async fn resolve(
        &self,
        organization_id: &str,
        target: &RecipientTarget,
        channels: &[Channel],
    ) -> Result<Resolution> {
        let dir = &self.directory;
        let ids = dedup(target.ids());
        if !matches!(target, RecipientTarget::Everyone) && ids.is_empty() {
            return Err(Error::validation(format!(
                "target '{}' needs at least one id",
                target.kind()
            )));
        }

        let users = match target {
            RecipientTarget::Everyone => dir.org_users(organization_id).await?,
            RecipientTarget::Users(_) => dir.users_by_ids(organization_id, &ids).await?,
            RecipientTarget::Roles(_) => dir.users_by_roles(organization_id, &ids).await?,
            RecipientTarget::Teams(_) => dir.users_by_teams(organization_id, &ids).await?,
            RecipientTarget::Divisions(_) => dir.users_by_divisions(organization_id, &ids).await?,
            RecipientTarget::Programs(_) => dir.users_by_programs(organization_id, &ids).await?,
        };

        let mut resolution = Resolution::default();
        for user in users {
            resolution.user_ids.insert(user.id.clone());
            resolution.users.insert(user.id.clone(), user);
        }

        if let RecipientTarget::Users(_) = target {
            for id in &ids {
                if !resolution.user_ids.contains(id) {
                    resolution
                        .skipped
                        .push(SkippedRecipient::new(id.as_str(), SKIP_NOT_IN_ORGANIZATION));
                }
            }
        }

        if resolution.user_ids.is_empty() {
            return Err(Error::NoRecipients(format!(
                "target '{}' matched no users in organization {}",
                target.kind(),
                organization_id
            )));
        }

        flag_missing_contacts(&mut resolution, channels);

        debug!(
            organization_id = %organization_id,
            target = %target.kind(),
            recipients = resolution.user_ids.len(),
            skipped = resolution.skipped.len(),
            "Resolved recipients"
        );
        Ok(resolution)
    }

    /// Union of everyone an event targets: its team, explicit users, roles,
    /// programs and divisions.
    pub async fn event_participants(&self, event: &EventDbModel) -> Result<BTreeSet<String>> {
        let org = event.organization_id.as_str();
        let dir = &self.directory;
        let mut participants = BTreeSet::new();

        if let Some(team_id) = event.team_id.as_deref().filter(|t| !t.is_empty()) {
            extend(&mut participants, dir.users_by_teams(org, &[team_id.to_string()]).await?);
        }
        let user_ids = EventDbModel::list(&event.target_user_ids);
        if !user_ids.is_empty() {
            extend(&mut participants, dir.users_by_ids(org, &user_ids).await?);
        }
        let roles = EventDbModel::list(&event.target_roles);
        if !roles.is_empty() {
            extend(&mut participants, dir.users_by_roles(org, &roles).await?);
        }
        let programs = EventDbModel::list(&event.target_program_ids);
        if !programs.is_empty() {
            extend(&mut participants, dir.users_by_programs(org, &programs).await?);
        }
        let divisions = EventDbModel::list(&event.target_division_ids);
        if !divisions.is_empty() {
            extend(&mut participants, dir.users_by_divisions(org, &divisions).await?);
        }
        Ok(participants)
    }
}

fn extend(set: &mut BTreeSet<String>, users: Vec<UserDbModel>) {
    set.extend(users.into_iter().map(|u| u.id));
}

fn dedup(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty() && seen.insert(id.to_string()))
        .map(str::to_string)
        .collect()
}

/// Flag users lacking a phone (sms) or email (email) address. This is
/// bookkeeping only; the user remains a recipient on every channel.
fn flag_missing_contacts(resolution: &mut Resolution, channels: &[Channel]) {
    let wants_sms = channels.contains(&Channel::Sms);
    let wants_email = channels.contains(&Channel::Email);
    for user in resolution.users.values() {
        if wants_sms && !user.has_phone() {
            resolution
                .skipped
                .push(SkippedRecipient::new(user.id.as_str(), SKIP_NO_PHONE));
        }
        if wants_email && !user.has_email() {
            resolution
                .skipped
                .push(SkippedRecipient::new(user.id.as_str(), SKIP_NO_EMAIL));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, email: Option<&str>, phone: Option<&str>) -> UserDbModel {
        UserDbModel {
            id: id.to_string(),
            organization_id: "org".to_string(),
            display_name: id.to_string(),
            role: "parent".to_string(),
            email: email.map(str::to_string),
            phone: phone.map(str::to_string),
        }
    }

    #[test]
    fn test_dedup_trims_and_drops_blanks() {
        let ids = vec!["a".to_string(), " a ".to_string(), "".to_string(), "b".to_string()];
        assert_eq!(dedup(&ids), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_missing_contacts_are_flagged_not_removed() {
        let mut resolution = Resolution::default();
        for u in [
            user("u1", Some("a@example.com"), Some("+1555")),
            user("u2", None, Some("+1556")),
            user("u3", Some("c@example.com"), Some("  ")),
        ] {
            resolution.user_ids.insert(u.id.clone());
            resolution.users.insert(u.id.clone(), u);
        }

        flag_missing_contacts(&mut resolution, &[Channel::Sms, Channel::Email]);
        assert_eq!(resolution.user_ids.len(), 3);
        assert_eq!(
            resolution.skipped,
            vec![
                SkippedRecipient::new("u2", SKIP_NO_EMAIL),
                SkippedRecipient::new("u3", SKIP_NO_PHONE),
            ]
        );
    }
}
