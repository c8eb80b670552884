//! In-memory Graph directory for tests

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::diff::ApplicationPatch;
use super::graph::{Application, GraphApi, GraphError, PasswordCredential};

#[derive(Default)]
struct Directory {
    apps: Vec<Application>,
    next_id: u32,
    mutations: usize,
    fail_mutations: bool,
    fail_removals: bool,
}

impl Directory {
    fn next(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn app_mut(&mut self, object_id: &str) -> Result<&mut Application, GraphError> {
        self.apps
            .iter_mut()
            .find(|a| a.id == object_id)
            .ok_or_else(|| GraphError::NotFound(object_id.to_string()))
    }

    fn mutate(&mut self) -> Result<(), GraphError> {
        if self.fail_mutations {
            return Err(GraphError::Http("connection reset".into()));
        }
        self.mutations += 1;
        Ok(())
    }
}

/// Graph double counting every mutating call
#[derive(Default)]
pub struct FakeGraph {
    directory: Mutex<Directory>,
}

impl FakeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an application, assigning IDs when missing
    pub fn insert(&self, mut app: Application) -> Application {
        let mut dir = self.directory.lock().unwrap();
        let n = dir.next();
        if app.id.is_empty() {
            app.id = format!("obj-{n}");
        }
        if app.app_id.is_empty() {
            app.app_id = format!("app-{n}");
        }
        dir.apps.push(app.clone());
        app
    }

    pub fn application(&self, display_name: &str) -> Option<Application> {
        let dir = self.directory.lock().unwrap();
        dir.apps
            .iter()
            .find(|a| a.display_name == display_name)
            .cloned()
    }

    pub fn mutations(&self) -> usize {
        self.directory.lock().unwrap().mutations
    }

    /// Move the end date of a stored password credential
    pub fn set_password_end(&self, display_name: &str, key_id: &str, end: DateTime<Utc>) {
        let mut dir = self.directory.lock().unwrap();
        if let Some(credential) = dir
            .apps
            .iter_mut()
            .filter(|a| a.display_name == display_name)
            .flat_map(|a| a.password_credentials.iter_mut())
            .find(|c| c.key_id == key_id)
        {
            credential.end_date_time = Some(end);
        }
    }

    /// Make every following password removal fail
    pub fn fail_password_removal(&self) {
        self.directory.lock().unwrap().fail_removals = true;
    }

    /// Make every following mutating call fail
    pub fn fail_mutations(&self) {
        self.directory.lock().unwrap().fail_mutations = true;
    }
}

#[async_trait]
impl GraphApi for FakeGraph {
    async fn list_applications_by_name(
        &self,
        display_name: &str,
    ) -> Result<Vec<Application>, GraphError> {
        let dir = self.directory.lock().unwrap();
        Ok(dir
            .apps
            .iter()
            .filter(|a| a.display_name.eq_ignore_ascii_case(display_name))
            .cloned()
            .collect())
    }

    async fn get_application_by_app_id(&self, app_id: &str) -> Result<Application, GraphError> {
        let dir = self.directory.lock().unwrap();
        dir.apps
            .iter()
            .find(|a| a.app_id == app_id)
            .cloned()
            .ok_or_else(|| GraphError::NotFound(app_id.to_string()))
    }

    async fn create_application(&self, app: &Application) -> Result<Application, GraphError> {
        let mut dir = self.directory.lock().unwrap();
        dir.mutate()?;
        let n = dir.next();
        let mut created = app.clone();
        created.id = format!("obj-{n}");
        created.app_id = format!("app-{n}");
        created.password_credentials = Vec::new();
        dir.apps.push(created.clone());
        Ok(created)
    }

    async fn update_application(
        &self,
        object_id: &str,
        patch: &ApplicationPatch,
    ) -> Result<(), GraphError> {
        let mut dir = self.directory.lock().unwrap();
        dir.mutate()?;
        let app = dir.app_mut(object_id)?;
        if let Some(web) = &patch.web {
            app.web = web.clone();
        }
        if let Some(claims) = &patch.optional_claims {
            app.optional_claims = Some(claims.clone());
        }
        if let Some(access) = &patch.required_resource_access {
            app.required_resource_access = access.clone();
        }
        Ok(())
    }

    async fn delete_application(&self, object_id: &str) -> Result<(), GraphError> {
        let mut dir = self.directory.lock().unwrap();
        dir.mutate()?;
        let before = dir.apps.len();
        dir.apps.retain(|a| a.id != object_id);
        if dir.apps.len() == before {
            return Err(GraphError::NotFound(object_id.to_string()));
        }
        Ok(())
    }

    async fn add_password(
        &self,
        object_id: &str,
        display_name: &str,
        end_date_time: DateTime<Utc>,
    ) -> Result<PasswordCredential, GraphError> {
        let mut dir = self.directory.lock().unwrap();
        dir.mutate()?;
        let n = dir.next();
        let secret = format!("{n:03}~generated-secret");
        let stored = PasswordCredential {
            key_id: format!("key-{n}"),
            display_name: Some(display_name.to_string()),
            end_date_time: Some(end_date_time),
            hint: Some(secret.chars().take(3).collect()),
            secret_text: None,
        };
        dir.app_mut(object_id)?
            .password_credentials
            .push(stored.clone());
        Ok(PasswordCredential {
            secret_text: Some(secret),
            ..stored
        })
    }

    async fn remove_password(&self, object_id: &str, key_id: &str) -> Result<(), GraphError> {
        let mut dir = self.directory.lock().unwrap();
        if dir.fail_removals {
            return Err(GraphError::Http("service unavailable".into()));
        }
        dir.mutate()?;
        let app = dir.app_mut(object_id)?;
        let before = app.password_credentials.len();
        app.password_credentials.retain(|c| c.key_id != key_id);
        if app.password_credentials.len() == before {
            return Err(GraphError::NotFound(key_id.to_string()));
        }
        Ok(())
    }
}
