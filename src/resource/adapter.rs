//! Request pipeline for one resource.
//!
//! Every operation runs the same fixed sequence: query parameters are checked
//! against the declared fields, then path parameters, then the body container.
//! The body is projected onto the schema, an instance is constructed, and
//! exactly one `Orm` call is made. Anything rejected before dispatch never
//! reaches the store.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::schema::{ResourceSchema, ValidationError};
use crate::error::{AppError, AppResult};
use crate::storage::{DocRef, DocumentRecord, Orm, SetExpr};

/// Status plus JSON body, ready to be rendered.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: StatusCode,
    pub body: Value,
}

impl Reply {
    fn ok(body: Value) -> Self { Self { status: StatusCode::OK, body } }

    fn created(body: Value) -> Self { Self { status: StatusCode::CREATED, body } }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response { (self.status, Json(self.body)).into_response() }
}

/// Raw request parts the pipeline needs: decoded query pairs (in order, duplicates
/// kept), path parameter names and values, and the unparsed body.
#[derive(Debug, Default, Clone)]
pub struct RawRequest<'a> {
    pub query: &'a [(String, String)],
    pub path: &'a [(String, String)],
    pub body: &'a [u8],
}

#[derive(Clone)]
pub struct ResourceAdapter {
    schema: Arc<ResourceSchema>,
    orm: Orm,
}

impl ResourceAdapter {
    pub fn new(schema: Arc<ResourceSchema>, orm: Orm) -> Self { Self { schema, orm } }

    pub fn collection(&self) -> &str { self.schema.name() }

    pub async fn create(&self, req: RawRequest<'_>) -> AppResult<Reply> {
        self.check_params(&req)?;
        let body = parse_object(req.body)?;
        let instance = self.schema.construct(self.schema.project(body))?;
        let record = self.orm.create_one(self.collection(), instance).await?;
        Ok(Reply::created(record.to_json()))
    }

    pub async fn get(&self, req: RawRequest<'_>) -> AppResult<Reply> {
        self.check_params(&req)?;
        let doc_ref = self.path_ref(&req)?;
        let record = self.orm.get_one(&doc_ref).await?;
        Ok(Reply::ok(record.to_json()))
    }

    pub async fn update(&self, req: RawRequest<'_>) -> AppResult<Reply> {
        self.check_params(&req)?;
        let doc_ref = self.path_ref(&req)?;
        let body = parse_object(req.body)?;
        let instance = self.schema.construct_partial(self.schema.project(body))?;
        let record = self.orm.update_one(&doc_ref, instance).await?;
        Ok(Reply::ok(record.to_json()))
    }

    pub async fn delete(&self, req: RawRequest<'_>) -> AppResult<Reply> {
        self.check_params(&req)?;
        let doc_ref = self.path_ref(&req)?;
        self.orm.delete_one(&doc_ref).await?;
        Ok(Reply::ok(json!({})))
    }

    /// Whole collection without parameters; otherwise the index whose terms are
    /// exactly the parameter names.
    pub async fn list(&self, req: RawRequest<'_>) -> AppResult<Reply> {
        self.check_params(&req)?;
        let records = match self.index_lookup(req.query)? {
            None => self.orm.list(self.collection()).await?,
            Some((index, terms)) => self.orm.query_by_index(self.collection(), &index, Some(terms)).await?,
        };
        Ok(Reply::ok(records_json(&records)))
    }

    pub async fn count(&self, req: RawRequest<'_>) -> AppResult<Reply> {
        self.check_params(&req)?;
        let set = match self.index_lookup(req.query)? {
            None => SetExpr::Documents(self.collection().to_string()),
            Some((index, terms)) => SetExpr::Match { index, terms },
        };
        let count = self.orm.query_count(set).await?;
        Ok(Reply::ok(json!({ "count": count })))
    }

    pub async fn create_batch(&self, req: RawRequest<'_>) -> AppResult<Reply> {
        self.check_params(&req)?;
        let items = parse_array(req.body)?;
        let mut instances = Vec::with_capacity(items.len());
        let mut errors = Vec::new();
        for (i, item) in items.into_iter().enumerate() {
            let obj = element_object(i, item)?;
            match self.schema.construct(self.schema.project(obj)) {
                Ok(instance) => instances.push(instance),
                Err(e) => errors.extend(prefixed(i, e)),
            }
        }
        if !errors.is_empty() {
            return Err(ValidationError { errors }.into());
        }
        let records = self.orm.create_many(self.collection(), instances).await?;
        Ok(Reply::created(records_json(&records)))
    }

    /// Elements are objects carrying a string `ref` plus the fields to change.
    pub async fn update_batch(&self, req: RawRequest<'_>) -> AppResult<Reply> {
        self.check_params(&req)?;
        let items = parse_array(req.body)?;
        let mut refs = Vec::with_capacity(items.len());
        let mut instances = Vec::with_capacity(items.len());
        let mut errors = Vec::new();
        for (i, item) in items.into_iter().enumerate() {
            let obj = element_object(i, item)?;
            let id = match obj.get("ref") {
                Some(Value::String(id)) if !id.is_empty() => id.clone(),
                _ => return Err(AppError::user("bad_body".to_string(), format!("element {i}: expected a string 'ref'"))),
            };
            refs.push(DocRef::new(self.collection(), id));
            match self.schema.construct_partial(self.schema.project(obj)) {
                Ok(instance) => instances.push(instance),
                Err(e) => errors.extend(prefixed(i, e)),
            }
        }
        if !errors.is_empty() {
            return Err(ValidationError { errors }.into());
        }
        let records = self.orm.update_many(&refs, instances).await?;
        Ok(Reply::ok(records_json(&records)))
    }

    /// Body is an array of document ids.
    pub async fn delete_batch(&self, req: RawRequest<'_>) -> AppResult<Reply> {
        self.check_params(&req)?;
        let refs = self.id_array(req.body)?;
        self.orm.delete_many(&refs).await?;
        Ok(Reply::ok(json!({})))
    }

    /// Body is an array of document ids; records come back in the same order.
    pub async fn fetch(&self, req: RawRequest<'_>) -> AppResult<Reply> {
        self.check_params(&req)?;
        let refs = self.id_array(req.body)?;
        let records = self.orm.get_many(&refs).await?;
        Ok(Reply::ok(records_json(&records)))
    }

    fn check_params(&self, req: &RawRequest<'_>) -> AppResult<()> {
        let unknown = self.schema.undeclared(req.query.iter().map(|(k, _)| k.as_str()));
        if !unknown.is_empty() {
            debug!(target: "chanchito::resource", resource = self.collection(), ?unknown, "rejected query parameters");
            return Err(AppError::user("unknown_parameter".to_string(), format!("unknown query parameter(s): {}", unknown.join(", "))));
        }
        let mut seen = std::collections::BTreeSet::new();
        if let Some((dup, _)) = req.query.iter().find(|(k, _)| !seen.insert(k.as_str())) {
            return Err(AppError::user("duplicate_parameter".to_string(), format!("query parameter '{dup}' given more than once")));
        }
        let unknown = self.schema.undeclared(req.path.iter().map(|(k, _)| k.as_str()));
        if !unknown.is_empty() {
            return Err(AppError::user("unknown_parameter".to_string(), format!("unknown path parameter(s): {}", unknown.join(", "))));
        }
        Ok(())
    }

    fn path_ref(&self, req: &RawRequest<'_>) -> AppResult<DocRef> {
        match req.path.iter().find(|(k, _)| k == "ref") {
            Some((_, id)) if !id.is_empty() => Ok(DocRef::new(self.collection(), id.clone())),
            _ => Err(AppError::user("missing_ref".to_string(), "missing document reference".to_string())),
        }
    }

    /// `None` for an unfiltered request, else the index name and its terms in index order.
    fn index_lookup(&self, query: &[(String, String)]) -> AppResult<Option<(String, Vec<Value>)>> {
        if query.is_empty() {
            return Ok(None);
        }
        let names: Vec<&str> = query.iter().map(|(k, _)| k.as_str()).collect();
        let index = self.schema.index_for(&names).ok_or_else(|| {
            AppError::not_found("no_index".to_string(), format!("no index on '{}' covers {}", self.collection(), names.join(", ")))
        })?;
        let mut terms = Vec::with_capacity(index.terms.len());
        for term in &index.terms {
            let raw = query.iter().find(|(k, _)| k == term).map(|(_, v)| v.as_str()).unwrap_or_default();
            let value = self
                .schema
                .field(term)
                .and_then(|f| f.ty.coerce_param(raw))
                .ok_or_else(|| ValidationError::single(term.clone(), format!("cannot use '{raw}' as a value for this field")))?;
            terms.push(value);
        }
        Ok(Some((index.name.clone(), terms)))
    }

    fn id_array(&self, body: &[u8]) -> AppResult<Vec<DocRef>> {
        parse_array(body)?
            .into_iter()
            .enumerate()
            .map(|(i, v)| match v {
                Value::String(id) if !id.is_empty() => Ok(DocRef::new(self.collection(), id)),
                _ => Err(AppError::user("bad_body".to_string(), format!("element {i}: expected a document id string"))),
            })
            .collect()
    }
}

fn parse_body(body: &[u8]) -> AppResult<Option<Value>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| AppError::user("invalid_json".to_string(), format!("request body is not valid JSON: {e}")))
}

fn parse_object(body: &[u8]) -> AppResult<Map<String, Value>> {
    match parse_body(body)? {
        None => Ok(Map::new()),
        Some(Value::Object(m)) => Ok(m),
        Some(_) => Err(AppError::user("bad_body".to_string(), "expected a JSON object".to_string())),
    }
}

fn parse_array(body: &[u8]) -> AppResult<Vec<Value>> {
    match parse_body(body)? {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(AppError::user("bad_body".to_string(), "expected a JSON array".to_string())),
    }
}

fn element_object(i: usize, v: Value) -> AppResult<Map<String, Value>> {
    match v {
        Value::Object(m) => Ok(m),
        _ => Err(AppError::user("bad_body".to_string(), format!("element {i}: expected a JSON object"))),
    }
}

fn prefixed(i: usize, err: ValidationError) -> impl Iterator<Item = super::schema::FieldError> {
    err.errors.into_iter().map(move |mut e| {
        e.path = format!("[{i}].{}", e.path);
        e
    })
}

fn records_json(records: &[DocumentRecord]) -> Value {
    Value::Array(records.iter().map(DocumentRecord::to_json).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::schema::FieldType;
    use crate::storage::{ExecutionMode, MemoryStore, SharedStore};

    fn schema() -> Arc<ResourceSchema> {
        Arc::new(
            ResourceSchema::builder("prototypes")
                .required("name", FieldType::String)
                .optional("email", FieldType::Email)
                .optional("stars", FieldType::Integer)
                .index("prototypes_by_name", &["name"])
                .build()
                .unwrap(),
        )
    }

    async fn adapter() -> (ResourceAdapter, Arc<MemoryStore>) {
        let mem = Arc::new(MemoryStore::new());
        let orm = Orm::new(SharedStore::from(mem.clone()), ExecutionMode::Transactional);
        orm.create_collection("prototypes").await.unwrap();
        orm.create_index("prototypes", "prototypes_by_name", Some(vec!["name".into()])).await.unwrap();
        (ResourceAdapter::new(schema(), orm), mem)
    }

    fn q(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test]
    async fn undeclared_query_parameter_never_reaches_store() {
        let (a, mem) = adapter().await;
        let before = mem.calls();
        let query = q(&[("bogus", "1")]);
        let err = a.list(RawRequest { query: &query, ..Default::default() }).await.unwrap_err();
        assert_eq!(err.http_status(), 400);
        let err = a.create(RawRequest { query: &query, body: br#"{"name":"x"}"#, ..Default::default() }).await.unwrap_err();
        assert_eq!(err.http_status(), 400);
        assert_eq!(mem.calls(), before);
    }

    #[tokio::test]
    async fn undeclared_path_parameter_never_reaches_store() {
        let (a, mem) = adapter().await;
        let created = a.create(RawRequest { body: br#"{"name":"p"}"#, ..Default::default() }).await.unwrap();
        let id = created.body["ref"]["id"].as_str().unwrap().to_string();
        let before = mem.calls();

        let path = vec![("ref".to_string(), id), ("owner".to_string(), "1".to_string())];
        let errs = [
            a.get(RawRequest { path: &path, ..Default::default() }).await.unwrap_err(),
            a.update(RawRequest { path: &path, body: br#"{"name":"q"}"#, ..Default::default() }).await.unwrap_err(),
            a.delete(RawRequest { path: &path, ..Default::default() }).await.unwrap_err(),
        ];
        for err in errs {
            assert_eq!(err.http_status(), 400);
            assert_eq!(err.code_str(), "unknown_parameter");
            assert!(err.message().contains("owner"));
        }
        assert_eq!(mem.calls(), before);
    }

    #[tokio::test]
    async fn duplicate_query_parameter_is_rejected() {
        let (a, _) = adapter().await;
        let query = q(&[("name", "a"), ("name", "b")]);
        let err = a.list(RawRequest { query: &query, ..Default::default() }).await.unwrap_err();
        assert_eq!(err.code_str(), "duplicate_parameter");
    }

    #[tokio::test]
    async fn create_projects_and_validates() {
        let (a, _) = adapter().await;
        let reply = a
            .create(RawRequest { body: br#"{"name":"p","extra":1,"ref":"forged","ts":5}"#, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(reply.status, StatusCode::CREATED);
        assert_eq!(reply.body["data"], json!({ "name": "p" }));
        assert_ne!(reply.body["ref"]["id"], "forged");

        let err = a.create(RawRequest { body: br#"{"email":"nope"}"#, ..Default::default() }).await.unwrap_err();
        assert_eq!(err.http_status(), 422);
        let err = a.create(RawRequest { body: b"[1]", ..Default::default() }).await.unwrap_err();
        assert_eq!(err.http_status(), 400);
        let err = a.create(RawRequest { body: b"{not json", ..Default::default() }).await.unwrap_err();
        assert_eq!(err.code_str(), "invalid_json");
    }

    #[tokio::test]
    async fn index_listing_and_count() {
        let (a, _) = adapter().await;
        for name in ["a", "b", "a"] {
            let body = format!(r#"{{"name":"{name}"}}"#);
            a.create(RawRequest { body: body.as_bytes(), ..Default::default() }).await.unwrap();
        }
        let query = q(&[("name", "a")]);
        let reply = a.list(RawRequest { query: &query, ..Default::default() }).await.unwrap();
        assert_eq!(reply.body.as_array().unwrap().len(), 2);
        let reply = a.count(RawRequest::default()).await.unwrap();
        assert_eq!(reply.body, json!({ "count": 3 }));

        let query = q(&[("email", "a@b.co")]);
        let err = a.list(RawRequest { query: &query, ..Default::default() }).await.unwrap_err();
        assert_eq!(err.http_status(), 404);
    }

    #[tokio::test]
    async fn batch_update_requires_refs() {
        let (a, _) = adapter().await;
        let created = a.create_batch(RawRequest { body: br#"[{"name":"a"},{"name":"b"}]"#, ..Default::default() }).await.unwrap();
        let ids: Vec<String> = created.body.as_array().unwrap().iter().map(|r| r["ref"]["id"].as_str().unwrap().to_string()).collect();

        let body = json!([{ "ref": ids[0], "stars": 1 }, { "ref": ids[1], "stars": 2 }]).to_string();
        let reply = a.update_batch(RawRequest { body: body.as_bytes(), ..Default::default() }).await.unwrap();
        assert_eq!(reply.body[1]["data"], json!({ "name": "b", "stars": 2 }));

        let err = a.update_batch(RawRequest { body: br#"[{"stars":1}]"#, ..Default::default() }).await.unwrap_err();
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn batch_validation_reports_element_paths() {
        let (a, mem) = adapter().await;
        let err = a.create_batch(RawRequest { body: br#"[{"name":"ok"},{"stars":"x"}]"#, ..Default::default() }).await.unwrap_err();
        match err {
            AppError::Validation { errors, .. } => assert!(errors.iter().any(|e| e.path == "[1].name")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(mem.is_empty("prototypes"));
    }
}
