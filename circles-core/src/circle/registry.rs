//! Circle identity and metadata.

use std::sync::Arc;

use tracing::info;

use super::error::{CircleError, Result};
use super::roles::{require_on, seed_defaults};
use super::types::{Capability, Circle, CircleFilter, CircleUpdate, NewCircle, Role};
use crate::activity::{self, ActivityKind};
use crate::clock::Clock;
use crate::ids::CircleId;
use crate::storage::{self, CircleStorage};

/// Longest accepted circle name, in characters.
pub const MAX_NAME_LEN: usize = 100;

/// Longest accepted circle description, in characters.
pub const MAX_DESCRIPTION_LEN: usize = 2_000;

/// Id characters used in the slug of a name with no ASCII letters or digits.
const FALLBACK_SLUG_CHARS: usize = 12;

/// Derives a lower-kebab slug from a circle name.
///
/// Runs of anything other than ASCII letters and digits collapse into a
/// single `-`, with no leading or trailing dash.
#[must_use]
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Slug for names with no ASCII letters or digits, e.g. "日本語コミュニティ".
fn fallback_slug(id: &CircleId) -> String {
    let suffix: String = id.as_str().chars().take(FALLBACK_SLUG_CHARS).collect();
    format!("circle-{suffix}")
}

fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CircleError::InvalidData("circle name is required".to_string()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(CircleError::InvalidData(format!(
            "circle name exceeds {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

fn validate_description(description: Option<&str>) -> Result<()> {
    if description.is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LEN) {
        return Err(CircleError::InvalidData(format!(
            "description exceeds {MAX_DESCRIPTION_LEN} characters"
        )));
    }
    Ok(())
}

/// Creates, looks up and lists circles.
pub struct CircleRegistry {
    storage: Arc<CircleStorage>,
    clock: Arc<dyn Clock>,
    max_page_size: u32,
}

impl CircleRegistry {
    /// Creates a registry.
    #[must_use]
    pub fn new(storage: Arc<CircleStorage>, clock: Arc<dyn Clock>, max_page_size: u32) -> Self {
        Self {
            storage,
            clock,
            max_page_size,
        }
    }

    /// Creates a circle with `creator` as its first admin.
    ///
    /// The circle row, its four role rows, the creator's membership and
    /// leaderboard entry, and the `circle_created` activity entry commit
    /// together.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::InvalidData`] for a missing creator or an
    /// invalid name and [`CircleError::Conflict`] if the derived slug is
    /// already taken.
    pub fn create_circle(&self, creator: &str, new_circle: NewCircle) -> Result<Circle> {
        if creator.trim().is_empty() {
            return Err(CircleError::InvalidData("creator is required".to_string()));
        }
        let name = validate_name(&new_circle.name)?;
        validate_description(new_circle.description.as_deref())?;
        let id = CircleId::generate();
        let slug = match slugify(&name) {
            slug if slug.is_empty() => fallback_slug(&id),
            slug => slug,
        };

        let now = self.clock.now();
        let circle = Circle {
            id,
            name,
            slug,
            description: new_circle.description,
            image_url: new_circle.image_url,
            banner_url: new_circle.banner_url,
            creator: creator.to_string(),
            category: new_circle.category,
            visibility: new_circle.visibility,
            member_count: 1,
            created_at: now,
            updated_at: now,
        };

        self.storage.write(|tx| {
            if !storage::circles::insert_circle(tx, &circle)? {
                return Err(CircleError::Conflict(format!(
                    "slug {} is already taken",
                    circle.slug
                )));
            }
            seed_defaults(tx, &circle.id)?;
            storage::memberships::activate(tx, &circle.id, creator, Role::Admin, now)?;
            storage::leaderboard::seed_entry(tx, &circle.id, creator, now)?;
            activity::record(tx, &circle.id, creator, ActivityKind::CircleCreated, None, now)?;
            Ok(())
        })?;

        info!(
            circle_id = %circle.id,
            slug = %circle.slug,
            creator,
            visibility = circle.visibility.as_str(),
            "circle created"
        );
        Ok(circle)
    }

    /// Looks up a circle by id.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::NotFound`] if no such circle exists.
    pub fn get(&self, circle_id: &CircleId) -> Result<Circle> {
        self.storage
            .read(|conn| storage::circles::get_circle(conn, circle_id))?
            .ok_or_else(|| CircleError::NotFound(format!("circle {circle_id}")))
    }

    /// Looks up a circle by slug.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::NotFound`] if no circle has this slug.
    pub fn get_by_slug(&self, slug: &str) -> Result<Circle> {
        self.storage
            .read(|conn| storage::circles::get_circle_by_slug(conn, slug))?
            .ok_or_else(|| CircleError::NotFound(format!("circle with slug {slug}")))
    }

    /// Public circles, most members first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list(&self, filter: &CircleFilter) -> Result<Vec<Circle>> {
        let page = filter.page.clamped(self.max_page_size);
        self.storage
            .read(|conn| storage::circles::list_public(conn, filter.category, page))
    }

    /// Public circles matching `query` in name, slug or description.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::InvalidData`] for a blank query.
    pub fn search(&self, query: &str, limit: u32) -> Result<Vec<Circle>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(CircleError::InvalidData("search query is empty".to_string()));
        }
        let limit = limit.clamp(1, self.max_page_size);
        self.storage
            .read(|conn| storage::circles::search_public(conn, query, limit))
    }

    /// Updates circle metadata. The slug never changes.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::Forbidden`] unless `acting` can manage roles,
    /// [`CircleError::NotFound`] for an unknown circle and
    /// [`CircleError::InvalidData`] for an invalid name or description.
    pub fn update_circle(
        &self,
        acting: &str,
        circle_id: &CircleId,
        update: CircleUpdate,
    ) -> Result<Circle> {
        let name = update.name.as_deref().map(validate_name).transpose()?;
        validate_description(update.description.as_deref())?;
        let now = self.clock.now();

        let circle = self.storage.write(|tx| {
            require_on(tx, circle_id, acting, Capability::ManageRoles)?;
            let mut circle = storage::circles::get_circle(tx, circle_id)?
                .ok_or_else(|| CircleError::NotFound(format!("circle {circle_id}")))?;

            if let Some(name) = name {
                circle.name = name;
            }
            if let Some(description) = update.description {
                circle.description = Some(description);
            }
            if let Some(image_url) = update.image_url {
                circle.image_url = Some(image_url);
            }
            if let Some(banner_url) = update.banner_url {
                circle.banner_url = Some(banner_url);
            }
            if let Some(category) = update.category {
                circle.category = category;
            }
            if let Some(visibility) = update.visibility {
                circle.visibility = visibility;
            }
            circle.updated_at = now;

            storage::circles::update_metadata(tx, &circle)?;
            activity::record(tx, circle_id, acting, ActivityKind::CircleUpdated, None, now)?;
            Ok(circle)
        })?;

        info!(circle_id = %circle_id, acting, "circle updated");
        Ok(circle)
    }
}
