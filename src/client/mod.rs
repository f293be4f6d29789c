//! The client: connection handling, CRUD operations and transactions.
//!
//! Every operation is generic over an [`Entity`] and driven by its
//! descriptor. Statement text is rendered from the template catalogue with
//! structural fragments only; every value is passed as a bound parameter.
//! All statements go through [`OgmClient::execute`], which routes them into
//! the active transaction when there is one.

mod related;
mod transaction;

pub use transaction::Transaction;

use log::{debug, info, warn};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use url::Url;

use crate::driver::{
    BasicAuth, ConnectionSettings, Connector, Driver, Node, PropertyMap, QueryResult, Record,
    Statement, TransactionContext,
};
use crate::entity::{
    map_row, timestamp_millis, to_properties, Entity, EntityDescriptor, IdentifierFormat,
    Relationship, UUID_FIELD,
};
use crate::error::{OgmError, Result};
use crate::query::{assignment_clause, condition_clause, is_identifier, Substitutions, Template};

use related::{fetch_related, merge_related};

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub uri: String,
    pub auth: Option<BasicAuth>,
    pub identifier_format: IdentifierFormat,
}

impl ClientSettings {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            auth: None,
            identifier_format: IdentifierFormat::default(),
        }
    }

    /// Credentials are only kept when both parts are non-blank.
    pub fn with_credentials(mut self, user_name: &str, password: &str) -> Self {
        self.auth = BasicAuth::from_parts(user_name, password);
        self
    }

    /// Generate identifiers without hyphens.
    pub fn strip_hyphens(mut self, strip: bool) -> Self {
        self.identifier_format = IdentifierFormat::from_strip_hyphens(strip);
        self
    }
}

struct ActiveTransaction {
    id: u64,
    context: Box<dyn TransactionContext>,
}

/// Object-graph mapper over a [`Driver`].
///
/// The client is `Sync`, but a transaction is shared by everything using
/// the same client; callers that need independent transactions should use
/// one client each.
pub struct OgmClient {
    settings: ClientSettings,
    connector: Arc<dyn Connector>,
    driver: Option<Arc<dyn Driver>>,
    active: Mutex<Option<ActiveTransaction>>,
    next_transaction_id: AtomicU64,
}

fn require_uuid(uuid: &str) -> Result<()> {
    if uuid.trim().is_empty() {
        return Err(OgmError::InvalidArgument("uuid must not be blank".to_string()));
    }
    Ok(())
}

fn require_properties(properties: &PropertyMap) -> Result<()> {
    if properties.is_empty() {
        return Err(OgmError::InvalidArgument(
            "property map must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn descriptor<T: Entity>() -> Result<&'static EntityDescriptor> {
    let descriptor = T::descriptor();
    descriptor.validate()?;
    Ok(descriptor)
}

fn check_relationship(relationship: &Relationship) -> Result<()> {
    if !is_identifier(relationship.name) {
        return Err(OgmError::InvalidArgument(format!(
            "relationship name {:?} is not a valid identifier",
            relationship.name
        )));
    }
    Ok(())
}

fn relationship_substitutions(relationship: &Relationship) -> Substitutions {
    let (from, to) = relationship.direction.arrows();
    Substitutions::new()
        .with("fromPartDirection", from)
        .with("toPartDirection", to)
        .with("relationshipName", relationship.name)
}

impl OgmClient {
    pub fn new(settings: ClientSettings, connector: Arc<dyn Connector>) -> Self {
        Self {
            settings,
            connector,
            driver: None,
            active: Mutex::new(None),
            next_transaction_id: AtomicU64::new(1),
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Opens the driver. Calling it again on a connected client is a no-op.
    pub fn connect(&mut self) -> Result<()> {
        if self.driver.is_some() {
            return Ok(());
        }

        let uri = Url::parse(&self.settings.uri).map_err(|e| {
            OgmError::InvalidArgument(format!("invalid uri {:?}: {}", self.settings.uri, e))
        })?;
        if !self.connector.supports_scheme(uri.scheme()) {
            return Err(OgmError::UnsupportedScheme(uri.scheme().to_string()));
        }

        let settings = ConnectionSettings {
            uri,
            auth: self.settings.auth.clone(),
        };
        self.driver = Some(self.connector.connect(&settings)?);
        info!("Connected to {}", settings.uri);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.driver.is_some()
    }

    /// Round-trips a trivial statement; driver errors propagate.
    pub fn ping(&self) -> Result<bool> {
        let result = self.execute(Statement::new("RETURN 1"))?;
        Ok(!result.records.is_empty())
    }

    fn driver(&self) -> Result<&Arc<dyn Driver>> {
        self.driver.as_ref().ok_or(OgmError::NotConnected)
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveTransaction>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn active_transaction_id(&self) -> Option<u64> {
        self.lock_active().as_ref().map(|tx| tx.id)
    }

    /// Detaches the active transaction if it is still `id`.
    pub(crate) fn take_transaction(&self, id: u64) -> Option<Box<dyn TransactionContext>> {
        let mut active = self.lock_active();
        match active.as_ref() {
            Some(tx) if tx.id == id => active.take().map(|tx| tx.context),
            _ => None,
        }
    }

    /// Starts a transaction. An already active one is rolled back first.
    pub fn begin_transaction(&self) -> Result<Transaction<'_>> {
        let driver = self.driver()?;
        let mut active = self.lock_active();

        if let Some(previous) = active.take() {
            warn!(
                "Beginning a new transaction while {} is active; rolling it back",
                previous.id
            );
            previous.context.rollback()?;
        }

        let context = driver.begin_transaction()?;
        let id = self.next_transaction_id.fetch_add(1, Ordering::Relaxed);
        *active = Some(ActiveTransaction { id, context });
        debug!("Began transaction {}", id);

        Ok(Transaction::new(self, id))
    }

    /// Runs a statement in the active transaction, or in its own auto-commit
    /// session when there is none.
    pub(crate) fn execute(&self, statement: Statement) -> Result<QueryResult> {
        debug!(
            "Executing {} with params {:?}",
            statement.text,
            statement.params.keys().collect::<Vec<_>>()
        );

        let mut active = self.lock_active();
        if let Some(tx) = active.as_mut() {
            return Ok(tx.context.run(&statement)?);
        }
        drop(active);

        Ok(self.driver()?.run(&statement)?)
    }

    /// Maps a node to `T` after merging in its related nodes.
    fn materialize<T: Entity>(&self, descriptor: &EntityDescriptor, node: Node) -> Result<T> {
        let mut properties = node.properties;
        let uuid = properties
            .get(UUID_FIELD)
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(uuid) = uuid {
            let related = fetch_related(self, descriptor, &uuid)?;
            merge_related(&mut properties, related);
        }
        map_row(properties)
    }

    fn read<T: Entity>(&self, descriptor: &EntityDescriptor, result: QueryResult) -> Result<Vec<T>> {
        result
            .into_nodes()
            .into_iter()
            .map(|node| self.materialize(descriptor, node))
            .collect()
    }

    /// Creates a node with a fresh identifier and returns it as stored.
    pub fn add<T: Entity>(&self, entity: &T) -> Result<T> {
        let descriptor = descriptor::<T>()?;

        let mut properties = to_properties(entity, &descriptor.settable_fields())?;
        properties.insert(
            UUID_FIELD.to_string(),
            Value::String(self.settings.identifier_format.generate()),
        );

        let clause = condition_clause(&properties, "")?;
        let text = Template::Create.render(
            &Substitutions::new()
                .with("label", descriptor.label)
                .with("conditions", clause.text),
        )?;

        let result = self.execute(Statement::new(text).params(clause.params))?;
        if result.counters.nodes_created == 0 {
            return Err(OgmError::ZeroEffect(format!(
                "no {} node was created",
                descriptor.label
            )));
        }

        let node = result.first_node().cloned().ok_or_else(|| {
            OgmError::ZeroEffect(format!("create of {} returned no node", descriptor.label))
        })?;
        map_row(node.properties)
    }

    fn set_properties<T: Entity>(
        &self,
        descriptor: &EntityDescriptor,
        properties: PropertyMap,
        uuid: &str,
        fetch_result: bool,
    ) -> Result<Option<T>> {
        require_uuid(uuid)?;
        if properties.is_empty() {
            return Err(OgmError::InvalidArgument(format!(
                "nothing to update on {}",
                descriptor.label
            )));
        }

        let clause = assignment_clause(&properties, "n", "")?;
        let text = Template::Update.render(
            &Substitutions::new()
                .with("label", descriptor.label)
                .with("clause", clause.text)
                .with("return", if fetch_result { "RETURN n" } else { "" }),
        )?;

        let result = self.execute(
            Statement::new(text)
                .params(clause.params)
                .param(UUID_FIELD, uuid),
        )?;

        if !fetch_result {
            return Ok(None);
        }
        result
            .first_node()
            .cloned()
            .map(|node| map_row(node.properties))
            .transpose()
    }

    /// Overwrites every persisted field of node `uuid` with `entity`'s
    /// values. The updated node comes back only when `fetch_result` is set.
    pub fn update<T: Entity>(&self, entity: &T, uuid: &str, fetch_result: bool) -> Result<Option<T>> {
        let descriptor = descriptor::<T>()?;
        let properties = to_properties(entity, &descriptor.settable_fields())?;
        self.set_properties(descriptor, properties, uuid, fetch_result)
    }

    /// Like [`update`](Self::update), but only fields whose value is not
    /// null are written.
    pub fn partial_update<T: Entity>(
        &self,
        entity: &T,
        uuid: &str,
        fetch_result: bool,
    ) -> Result<Option<T>> {
        let descriptor = descriptor::<T>()?;
        let properties: PropertyMap = to_properties(entity, &descriptor.settable_fields())?
            .into_iter()
            .filter(|(_, value)| !value.is_null())
            .collect();
        self.set_properties(descriptor, properties, uuid, fetch_result)
    }

    /// Finds the node matching `matching`, or creates it.
    ///
    /// A created node gets `on_create`'s fields and a fresh identifier; a
    /// matched node gets `on_match`'s fields and keeps its identifier.
    pub fn merge<T: Entity>(&self, on_create: &T, on_match: &T, matching: &PropertyMap) -> Result<T> {
        let descriptor = descriptor::<T>()?;
        require_properties(matching)?;

        let condition = condition_clause(matching, "match_")?;

        let mut create_properties = to_properties(on_create, &descriptor.settable_fields())?;
        create_properties.insert(
            UUID_FIELD.to_string(),
            Value::String(self.settings.identifier_format.generate()),
        );
        let create = assignment_clause(&create_properties, "n", "onCreate_")?;

        let match_properties = to_properties(on_match, &descriptor.settable_fields())?;
        let update = assignment_clause(&match_properties, "n", "onMatch_")?;

        let on_match_clause = if update.is_empty() {
            String::new()
        } else {
            format!("ON MATCH SET {}", update.text)
        };

        let text = Template::Merge.render(
            &Substitutions::new()
                .with("label", descriptor.label)
                .with("conditions", condition.text)
                .with("on_create_clause", format!("ON CREATE SET {}", create.text))
                .with("on_match_clause", on_match_clause),
        )?;

        let result = self.execute(
            Statement::new(text)
                .params(condition.params)
                .params(create.params)
                .params(update.params),
        )?;

        let node = result.first_node().cloned().ok_or_else(|| {
            OgmError::ZeroEffect(format!("merge of {} returned no node", descriptor.label))
        })?;
        map_row(node.properties)
    }

    /// Soft delete: flags the node as deleted and stamps `UpdatedAt`.
    /// Returns the flagged node, or `None` when no live node matched.
    pub fn delete<T: Entity>(&self, uuid: &str) -> Result<Option<T>> {
        let descriptor = descriptor::<T>()?;
        require_uuid(uuid)?;

        let text = Template::Delete.render(&Substitutions::new().with("label", descriptor.label))?;
        let result = self.execute(
            Statement::new(text)
                .param(UUID_FIELD, uuid)
                .param("UpdatedAt", timestamp_millis()),
        )?;

        result
            .first_node()
            .cloned()
            .map(|node| map_row(node.properties))
            .transpose()
    }

    /// Removes the node and its relationships. True when exactly one node
    /// was removed.
    pub fn drop_by_uuid<T: Entity>(&self, uuid: &str) -> Result<bool> {
        let descriptor = descriptor::<T>()?;
        require_uuid(uuid)?;

        let text = Template::Drop.render(&Substitutions::new().with("label", descriptor.label))?;
        let result = self.execute(Statement::new(text).param(UUID_FIELD, uuid))?;
        Ok(result.counters.nodes_deleted == 1)
    }

    /// Removes every node matching `properties`; returns how many went.
    pub fn drop_by_properties<T: Entity>(&self, properties: &PropertyMap) -> Result<u64> {
        let descriptor = descriptor::<T>()?;
        require_properties(properties)?;

        let clause = condition_clause(properties, "")?;
        let text = Template::DropByProperties.render(
            &Substitutions::new()
                .with("label", descriptor.label)
                .with("clause", clause.text),
        )?;
        let result = self.execute(Statement::new(text).params(clause.params))?;
        Ok(result.counters.nodes_deleted)
    }

    /// Live nodes whose `property` equals `value`, with related nodes.
    pub fn get_by_property<T: Entity>(&self, property: &str, value: impl Into<Value>) -> Result<Vec<T>> {
        let descriptor = descriptor::<T>()?;
        if !is_identifier(property) {
            return Err(OgmError::InvalidArgument(format!(
                "property name {:?} is not a valid identifier",
                property
            )));
        }
        let value = value.into();
        if value.is_null() {
            return Err(OgmError::InvalidArgument(format!(
                "value for {} must not be null",
                property
            )));
        }

        let text = Template::GetByProperty.render(
            &Substitutions::new()
                .with("label", descriptor.label)
                .with("property", property)
                .with("relationship", "")
                .with("relatedNode", "")
                .with("result", "n"),
        )?;
        let result = self.execute(Statement::new(text).param("value", value))?;
        self.read(descriptor, result)
    }

    /// Live nodes matching every entry of `properties`, with related nodes.
    pub fn get_by_properties<T: Entity>(&self, properties: &PropertyMap) -> Result<Vec<T>> {
        let descriptor = descriptor::<T>()?;
        require_properties(properties)?;

        let clause = condition_clause(properties, "")?;
        let text = Template::GetByProperties.render(
            &Substitutions::new()
                .with("label", descriptor.label)
                .with("clause", clause.text)
                .with("relationship", "")
                .with("relatedNode", "")
                .with("result", "n"),
        )?;
        let result = self.execute(Statement::new(text).params(clause.params))?;
        self.read(descriptor, result)
    }

    /// Every live node of the type, with related nodes.
    pub fn get_all<T: Entity>(&self) -> Result<Vec<T>> {
        let descriptor = descriptor::<T>()?;
        let text = Template::GetAll.render(
            &Substitutions::new()
                .with("label", descriptor.label)
                .with("result", "n"),
        )?;
        let result = self.execute(Statement::new(text))?;
        self.read(descriptor, result)
    }

    pub fn get_by_uuid_with_related_nodes<T: Entity>(&self, uuid: &str) -> Result<Option<T>> {
        require_uuid(uuid)?;
        Ok(self.get_by_property::<T>(UUID_FIELD, uuid)?.into_iter().next())
    }

    /// Creates an edge between two nodes, oriented by `relationship`'s
    /// direction as seen from `uuid_from`. Edge properties are bound as
    /// parameters. True when an edge was created.
    pub fn create_relationship(
        &self,
        uuid_from: &str,
        uuid_to: &str,
        relationship: &Relationship,
        properties: Option<&PropertyMap>,
    ) -> Result<bool> {
        require_uuid(uuid_from)?;
        require_uuid(uuid_to)?;
        check_relationship(relationship)?;

        let clause = match properties {
            Some(properties) => condition_clause(properties, "rel_")?,
            None => Default::default(),
        };
        let text = Template::CreateRelationship
            .render(&relationship_substitutions(relationship).with("clause", clause.braced()))?;

        let result = self.execute(
            Statement::new(text)
                .params(clause.params)
                .param("uuidFrom", uuid_from)
                .param("uuidTo", uuid_to),
        )?;
        Ok(result.counters.relationships_created >= 1)
    }

    /// Creates the edge unless it already exists. True only when this call
    /// created it.
    pub fn merge_relationship(
        &self,
        uuid_from: &str,
        uuid_to: &str,
        relationship: &Relationship,
    ) -> Result<bool> {
        require_uuid(uuid_from)?;
        require_uuid(uuid_to)?;
        check_relationship(relationship)?;

        let text = Template::MergeRelationship.render(&relationship_substitutions(relationship))?;
        let result = self.execute(
            Statement::new(text)
                .param("uuidFrom", uuid_from)
                .param("uuidTo", uuid_to),
        )?;
        Ok(result.counters.relationships_created > 0)
    }

    /// Deletes the matching edges between the two nodes. True when at least
    /// one was deleted.
    pub fn drop_relationship_between_two_nodes(
        &self,
        uuid_from: &str,
        uuid_to: &str,
        relationship: &Relationship,
    ) -> Result<bool> {
        require_uuid(uuid_from)?;
        require_uuid(uuid_to)?;
        check_relationship(relationship)?;

        let text = Template::DropRelationship.render(&relationship_substitutions(relationship))?;
        let result = self.execute(
            Statement::new(text)
                .param("uuidIncoming", uuid_from)
                .param("uuidOutgoing", uuid_to),
        )?;
        Ok(result.counters.relationships_deleted > 0)
    }

    /// Adds `label` to node `uuid`. Fails with [`OgmError::ZeroEffect`] when
    /// no label was added (no such node, or the label was already there).
    pub fn add_label(&self, uuid: &str, label: &str) -> Result<()> {
        require_uuid(uuid)?;
        if !is_identifier(label) {
            return Err(OgmError::InvalidArgument(format!(
                "label {:?} is not a valid identifier",
                label
            )));
        }

        let text = Template::AddLabel.render(&Substitutions::new().with("label", label))?;
        let result = self.execute(Statement::new(text).param(UUID_FIELD, uuid))?;
        if result.counters.labels_added == 0 {
            return Err(OgmError::ZeroEffect(format!(
                "label {} was not added to {}",
                label, uuid
            )));
        }
        Ok(())
    }

    /// Runs caller-written statement text. Values still go in `params`.
    pub fn run_custom_query(&self, text: &str, params: PropertyMap) -> Result<Vec<Record>> {
        Ok(self.execute(Statement::new(text).params(params))?.records)
    }

    /// Runs caller-written statement text and maps the node in the first
    /// column of each row to `T`. Related nodes are not resolved.
    pub fn run_custom_query_as<T: Entity>(&self, text: &str, params: PropertyMap) -> Result<Vec<T>> {
        self.execute(Statement::new(text).params(params))?
            .into_nodes()
            .into_iter()
            .map(|node| map_row(node.properties))
            .collect()
    }
}

impl Drop for OgmClient {
    fn drop(&mut self) {
        if let Some(tx) = self.lock_active().take() {
            warn!("Client dropped with transaction {} active; rolling back", tx.id);
            if let Err(e) = tx.context.rollback() {
                warn!("Rollback of transaction {} failed: {}", tx.id, e);
            }
        }
    }
}
