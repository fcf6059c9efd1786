use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;
use uuid::Uuid;

use crate::dao::{
    models::{SessionDocument, SessionPatch},
    session_store::SessionStore,
    storage::StorageResult,
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{CouchSessionDocument, session_doc_id},
};

/// Session store writing one CouchDB document per session.
#[derive(Clone)]
pub struct CouchSessionStore {
    client: Client,
    database_url: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

impl CouchSessionStore {
    /// Build the HTTP client and create the session database when missing.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;
        let store = Self {
            client,
            database_url: format!(
                "{}/{}",
                config.base_url.trim_end_matches('/'),
                config.database
            )
            .into(),
            auth: config
                .username
                .zip(config.password)
                .map(|(user, pass)| (user.into(), pass.into())),
        };

        store.ensure_database().await?;
        Ok(store)
    }

    /// Request against the database itself (`None`) or one of its documents.
    fn request(&self, method: Method, doc_id: Option<&str>) -> RequestBuilder {
        let url = match doc_id {
            Some(doc_id) => format!("{}/{doc_id}", self.database_url),
            None => self.database_url.to_string(),
        };
        let builder = self.client.request(method, url);
        match &self.auth {
            Some((user, pass)) => builder.basic_auth(user, Some(pass)),
            None => builder,
        }
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let path: &str = &self.database_url;
        let status = self
            .request(Method::GET, None)
            .send()
            .await
            .map_err(CouchDaoError::transport(path))?
            .status();
        if status != StatusCode::NOT_FOUND {
            return expect_success(path, status);
        }

        debug!(database = %self.database_url, "creating session database");
        let status = self
            .request(Method::PUT, None)
            .send()
            .await
            .map_err(CouchDaoError::transport(path))?
            .status();
        // 412: created concurrently by another instance.
        if status == StatusCode::PRECONDITION_FAILED {
            return Ok(());
        }
        expect_success(path, status)
    }

    async fn get_document<T: DeserializeOwned>(&self, doc_id: &str) -> CouchResult<Option<T>> {
        let response = self
            .request(Method::GET, Some(doc_id))
            .send()
            .await
            .map_err(CouchDaoError::transport(doc_id))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<T>()
                .await
                .map(Some)
                .map_err(CouchDaoError::transport(doc_id)),
            status => expect_success(doc_id, status).map(|()| None),
        }
    }

    async fn put_document<T: ?Sized + Serialize>(&self, doc_id: &str, document: &T) -> CouchResult<()> {
        let status = self
            .request(Method::PUT, Some(doc_id))
            .json(document)
            .send()
            .await
            .map_err(CouchDaoError::transport(doc_id))?
            .status();
        if status == StatusCode::CONFLICT {
            return Err(CouchDaoError::RevisionConflict {
                path: doc_id.to_string(),
            });
        }
        expect_success(doc_id, status)
    }

    async fn create_session(&self, document: SessionDocument) -> CouchResult<Uuid> {
        let id = document.id;
        self.put_document(&session_doc_id(id), &CouchSessionDocument::new(document, None))
            .await?;
        Ok(id)
    }

    async fn find_session(&self, id: Uuid) -> CouchResult<Option<SessionDocument>> {
        let document = self
            .get_document::<CouchSessionDocument>(&session_doc_id(id))
            .await?;
        Ok(document.map(CouchSessionDocument::into_document))
    }

    /// Read the current revision, merge the patch and write it back.
    async fn update_session(&self, id: Uuid, patch: SessionPatch) -> CouchResult<SessionDocument> {
        let doc_id = session_doc_id(id);
        let existing = self
            .get_document::<CouchSessionDocument>(&doc_id)
            .await?
            .ok_or(CouchDaoError::MissingDocument { id })?;

        let rev = existing.rev.clone();
        let mut session = existing.into_document();
        session.merge(patch);
        debug!(session_id = %id, ?rev, "writing merged session revision");
        self.put_document(&doc_id, &CouchSessionDocument::new(session.clone(), rev))
            .await?;
        Ok(session)
    }

    async fn ping(&self) -> CouchResult<()> {
        let path: &str = &self.database_url;
        let status = self
            .request(Method::GET, None)
            .send()
            .await
            .map_err(CouchDaoError::transport(path))?
            .status();
        expect_success(path, status)
    }
}

fn expect_success(path: &str, status: StatusCode) -> CouchResult<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(CouchDaoError::UnexpectedStatus {
            path: path.to_string(),
            status,
        })
    }
}

impl SessionStore for CouchSessionStore {
    fn create(&self, document: SessionDocument) -> BoxFuture<'static, StorageResult<Uuid>> {
        let store = self.clone();
        Box::pin(async move { store.create_session(document).await.map_err(Into::into) })
    }

    fn read(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionDocument>>> {
        let store = self.clone();
        Box::pin(async move { store.find_session(id).await.map_err(Into::into) })
    }

    fn update(
        &self,
        id: Uuid,
        patch: SessionPatch,
    ) -> BoxFuture<'static, StorageResult<SessionDocument>> {
        let store = self.clone();
        Box::pin(async move { store.update_session(id, patch).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
