//! Presentation-side mirror of the registry
//!
//! Keeps two lists, apps that still warn and apps the user put on the
//! temporary ignore list, and folds registry events into them.

use crate::observer::RegistryEvent;
use permwatch_api::{sort_by_warning_count, Application};
use serde::Serialize;

/// Split view of the registry for display
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplicationView {
    /// Apps with warnings that are not temporarily ignored, most warnings first
    pub warnable: Vec<Application>,
    /// Apps on the temporary ignore list, most warnings first
    pub ignored: Vec<Application>,
}

impl ApplicationView {
    /// Build a view from a registry snapshot
    pub fn from_snapshot(applications: Vec<Application>) -> Self {
        let (mut ignored, mut warnable): (Vec<_>, Vec<_>) = applications
            .into_iter()
            .partition(|app| app.temporarily_ignored);
        sort_by_warning_count(&mut warnable);
        sort_by_warning_count(&mut ignored);
        Self { warnable, ignored }
    }

    /// Fold one registry event into the view
    pub fn apply(&mut self, event: &RegistryEvent) {
        match event {
            RegistryEvent::DatabaseUpdated(applications) => {
                *self = Self::from_snapshot(applications.clone());
            }
            RegistryEvent::AppPermissionsUpdated(app)
            | RegistryEvent::AppAddedToIgnoreList(app)
            | RegistryEvent::AppRemovedFromIgnoreList(app) => self.replace(app),
        }
    }

    /// Total number of apps in both lists
    pub fn len(&self) -> usize {
        self.warnable.len() + self.ignored.len()
    }

    pub fn is_empty(&self) -> bool {
        self.warnable.is_empty() && self.ignored.is_empty()
    }

    fn replace(&mut self, app: &Application) {
        self.warnable.retain(|a| a != app);
        self.ignored.retain(|a| a != app);

        // Permission updates can leave an app with nothing to warn about
        if !app.has_warnings() && !app.temporarily_ignored {
            return;
        }

        let list = if app.temporarily_ignored {
            &mut self.ignored
        } else {
            &mut self.warnable
        };
        list.push(app.clone());
        sort_by_warning_count(list);
    }
}
