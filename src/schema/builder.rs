//! Declarative registration of entity classes
//!
//! Models are declared once at startup:
//!
//! ```rust,ignore
//! let mut schema = SchemaBuilder::new();
//! schema.entity("comment", |e| {
//!     e.column("message", ScalarType::String)
//!         .many_to_one("author", "user")
//!         .many_to_one("parent", "comment")
//!         .one_to_many("answers", "comment", "parent")
//!         .expose("message", &["all"])
//!         .expose_in("comment", "author", &["create", "list"])
//!         .max_depth_for("parent", 3)
//!         .subresource("answers")
//!         .constraint("message", validators::not_blank());
//! });
//! let metadata = schema.build_with(&config)?;
//! ```
//!
//! Names are resolved by `build`, so mutually referential models can be
//! declared in any order. Every dangling reference is a [`ConfigError`].

use crate::config::ExposeConfig;
use crate::core::error::ConfigError;
use crate::core::field::ScalarType;
use crate::core::operation::Operation;
use crate::core::validation::{ClassValidator, FieldConstraint, InputFilter};
use crate::exposure::{DepthGuard, DepthPolicy, ExposureRegistry};
use crate::mapping::{MapperOptions, SubresourceDescriptor, SubresourceManager};
use crate::query::filter::Filter;
use crate::schema::descriptor::{
    ColumnDescriptor, ComputeContext, ComputedProperty, EntityDescriptor, EntityKey,
    RelationDescriptor, RelationKind, SchemaRegistry,
};
use crate::schema::Metadata;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct RelationDecl {
    name: String,
    kind: RelationKind,
    target: String,
    inverse: Option<String>,
    owning: bool,
}

#[derive(Debug, Clone)]
struct ExposureDecl {
    property: String,
    operations: Vec<String>,
    context: Option<String>,
    exposed: bool,
}

/// Options of a subresource declaration
#[derive(Debug, Clone)]
pub struct SubresourceOptions {
    /// URL segment, defaults to the relation name
    pub segment: Option<String>,
    pub operations: Vec<Operation>,
    /// Longest chain of nested routes starting at this declaration
    pub max_depth: Option<u32>,
}

impl Default for SubresourceOptions {
    fn default() -> Self {
        Self {
            segment: None,
            operations: vec![Operation::List, Operation::Create],
            max_depth: None,
        }
    }
}

#[derive(Debug, Clone)]
struct SubresourceDecl {
    relation: String,
    options: SubresourceOptions,
}

/// Declarations of one entity class
#[derive(Clone, Default)]
pub struct EntityBuilder {
    name: String,
    parent: Option<String>,
    columns: Vec<ColumnDescriptor>,
    relations: Vec<RelationDecl>,
    computed: Vec<ComputedProperty>,
    unique: Vec<Vec<String>>,
    constraints: IndexMap<String, Vec<FieldConstraint>>,
    input_filters: IndexMap<String, Vec<InputFilter>>,
    class_validators: Vec<Arc<dyn ClassValidator>>,
    filters: Vec<Arc<dyn Filter>>,
    exposures: Vec<ExposureDecl>,
    depth: Option<DepthPolicy>,
    subresources: Vec<SubresourceDecl>,
    searchable: bool,
}

impl EntityBuilder {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn column(&mut self, name: &str, scalar: ScalarType) -> &mut Self {
        self.push_column(name, scalar, false)
    }

    pub fn nullable_column(&mut self, name: &str, scalar: ScalarType) -> &mut Self {
        self.push_column(name, scalar, true)
    }

    fn push_column(&mut self, name: &str, scalar: ScalarType, nullable: bool) -> &mut Self {
        self.columns.push(ColumnDescriptor {
            name: name.to_string(),
            scalar,
            nullable,
        });
        self
    }

    /// Storage-level unique constraint over columns or to-one relations
    pub fn unique(&mut self, properties: &[&str]) -> &mut Self {
        self.unique
            .push(properties.iter().map(|p| p.to_string()).collect());
        self
    }

    pub fn many_to_one(&mut self, name: &str, target: &str) -> &mut Self {
        self.push_relation(name, RelationKind::ManyToOne, target, None, true)
    }

    /// Owning one-to-one; chain `mapped_by` for the inverse side
    pub fn one_to_one(&mut self, name: &str, target: &str) -> &mut Self {
        self.push_relation(name, RelationKind::OneToOne, target, None, true)
    }

    pub fn one_to_many(&mut self, name: &str, target: &str, mapped_by: &str) -> &mut Self {
        self.push_relation(
            name,
            RelationKind::OneToMany,
            target,
            Some(mapped_by.to_string()),
            false,
        )
    }

    /// Owning many-to-many; chain `mapped_by` for the inverse side
    pub fn many_to_many(&mut self, name: &str, target: &str) -> &mut Self {
        self.push_relation(name, RelationKind::ManyToMany, target, None, true)
    }

    /// Make the last declared relation the inverse side of `inverse`
    pub fn mapped_by(&mut self, inverse: &str) -> &mut Self {
        if let Some(relation) = self.relations.last_mut() {
            relation.inverse = Some(inverse.to_string());
            relation.owning = false;
        }
        self
    }

    /// Name the relation on the target pointing back at the last declared one
    pub fn inversed_by(&mut self, inverse: &str) -> &mut Self {
        if let Some(relation) = self.relations.last_mut() {
            relation.inverse = Some(inverse.to_string());
        }
        self
    }

    fn push_relation(
        &mut self,
        name: &str,
        kind: RelationKind,
        target: &str,
        inverse: Option<String>,
        owning: bool,
    ) -> &mut Self {
        self.relations.push(RelationDecl {
            name: name.to_string(),
            kind,
            target: target.to_string(),
            inverse,
            owning,
        });
        self
    }

    pub fn extends(&mut self, parent: &str) -> &mut Self {
        self.parent = Some(parent.to_string());
        self
    }

    /// Read-only property computed from `depends_on` at normalization time
    pub fn computed<F>(&mut self, name: &str, depends_on: &[&str], compute: F) -> &mut Self
    where
        F: Fn(&ComputeContext<'_>) -> Value + Send + Sync + 'static,
    {
        self.computed.push(ComputedProperty {
            name: name.to_string(),
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
            compute: Arc::new(compute),
        });
        self
    }

    /// Expose a property to operations in every route context
    pub fn expose(&mut self, property: &str, operations: &[&str]) -> &mut Self {
        self.push_exposure(property, operations, None, true)
    }

    /// Expose a property only when `context` is the root entity of the route
    pub fn expose_in(&mut self, context: &str, property: &str, operations: &[&str]) -> &mut Self {
        self.push_exposure(property, operations, Some(context), true)
    }

    /// Hide a globally exposed property in one route context
    pub fn hide_in(&mut self, context: &str, property: &str, operations: &[&str]) -> &mut Self {
        self.push_exposure(property, operations, Some(context), false)
    }

    fn push_exposure(
        &mut self,
        property: &str,
        operations: &[&str],
        context: Option<&str>,
        exposed: bool,
    ) -> &mut Self {
        self.exposures.push(ExposureDecl {
            property: property.to_string(),
            operations: operations.iter().map(|o| o.to_string()).collect(),
            context: context.map(str::to_string),
            exposed,
        });
        self
    }

    pub fn depth(&mut self, policy: DepthPolicy) -> &mut Self {
        self.depth = Some(policy);
        self
    }

    /// Class-level default depth
    pub fn max_depth(&mut self, depth: u32) -> &mut Self {
        self.depth.get_or_insert_with(DepthPolicy::default).default_depth = Some(depth);
        self
    }

    /// Relation-level depth override
    pub fn max_depth_for(&mut self, relation: &str, depth: u32) -> &mut Self {
        self.depth
            .get_or_insert_with(DepthPolicy::default)
            .relations
            .insert(relation.to_string(), depth);
        self
    }

    pub fn subresource(&mut self, relation: &str) -> &mut Self {
        self.subresource_with(relation, SubresourceOptions::default())
    }

    pub fn subresource_with(&mut self, relation: &str, options: SubresourceOptions) -> &mut Self {
        self.subresources.push(SubresourceDecl {
            relation: relation.to_string(),
            options,
        });
        self
    }

    pub fn constraint<F>(&mut self, property: &str, constraint: F) -> &mut Self
    where
        F: Fn(&str, &Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.constraints
            .entry(property.to_string())
            .or_default()
            .push(Arc::new(constraint));
        self
    }

    pub fn input_filter<F>(&mut self, property: &str, filter: F) -> &mut Self
    where
        F: Fn(&str, Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.input_filters
            .entry(property.to_string())
            .or_default()
            .push(Arc::new(filter));
        self
    }

    pub fn class_validator(&mut self, validator: impl ClassValidator + 'static) -> &mut Self {
        self.class_validators.push(Arc::new(validator));
        self
    }

    pub fn filter(&mut self, filter: impl Filter + 'static) -> &mut Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Publish write events for this entity
    pub fn searchable(&mut self) -> &mut Self {
        self.searchable = true;
        self
    }
}

/// Collects entity declarations and freezes them into [`Metadata`]
#[derive(Default)]
pub struct SchemaBuilder {
    entities: Vec<EntityBuilder>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an entity class
    pub fn entity(&mut self, name: &str, declare: impl FnOnce(&mut EntityBuilder)) -> &mut Self {
        let mut entity = EntityBuilder::new(name);
        declare(&mut entity);
        self.entities.push(entity);
        self
    }

    pub fn build(self) -> Result<Metadata, ConfigError> {
        self.build_with(&ExposeConfig::default())
    }

    /// Resolve every declaration and freeze the registries
    pub fn build_with(self, config: &ExposeConfig) -> Result<Metadata, ConfigError> {
        let mut keys: HashMap<String, EntityKey> = HashMap::new();
        for (i, entity) in self.entities.iter().enumerate() {
            if keys.insert(entity.name.clone(), EntityKey(i)).is_some() {
                return Err(ConfigError::DuplicateEntity {
                    entity: entity.name.clone(),
                });
            }
        }
        let by_name: HashMap<&str, &EntityBuilder> = self
            .entities
            .iter()
            .map(|e| (e.name.as_str(), e))
            .collect();

        let mut chains = Vec::with_capacity(self.entities.len());
        for entity in &self.entities {
            chains.push(ancestor_chain(entity, &by_name)?);
        }

        let mut descriptors = Vec::with_capacity(self.entities.len());
        for (i, entity) in self.entities.iter().enumerate() {
            descriptors.push(flatten(EntityKey(i), entity, &chains[i], &by_name, &keys)?);
        }
        let schema = SchemaRegistry::from_descriptors(descriptors);
        for descriptor in schema.iter() {
            check_descriptor(descriptor, &schema)?;
        }

        let mut exposure = ExposureRegistry::new();
        for (entity, chain) in self.entities.iter().zip(&chains) {
            exposure.set_chain(&entity.name, chain.clone());
            register_exposures(entity, &schema, &mut exposure)?;
        }

        let mut depth = DepthGuard::new(config.max_depth.clone());
        for entity in &self.entities {
            let Some(policy) = &entity.depth else {
                continue;
            };
            let descriptor = lookup(&schema, &entity.name)?;
            for relation in policy.relations.keys() {
                if descriptor.relation(relation).is_none() {
                    return Err(ConfigError::UnknownRelation {
                        entity: entity.name.clone(),
                        relation: relation.clone(),
                        context: "depth override".to_string(),
                    });
                }
            }
            depth.set_policy(&entity.name, policy.clone());
        }

        let mut subresources = Vec::new();
        for entity in &self.entities {
            for decl in &entity.subresources {
                subresources.push(resolve_subresource(&entity.name, decl, &schema)?);
            }
        }
        let subresources = SubresourceManager::new(subresources, &depth);

        for descriptor in schema.iter() {
            for filter in &descriptor.filters {
                filter.check(descriptor, &schema)?;
            }
        }

        let searchable: HashSet<String> = self
            .entities
            .iter()
            .filter(|e| e.searchable)
            .map(|e| e.name.clone())
            .collect();

        tracing::info!(
            entities = schema.len(),
            subresource_routes = subresources.routes().len(),
            "schema frozen"
        );

        Ok(Metadata {
            schema: Arc::new(schema),
            exposure: Arc::new(exposure),
            depth: Arc::new(depth),
            subresources: Arc::new(subresources),
            searchable: Arc::new(searchable),
            options: MapperOptions {
                return_id_on_depth_stop: config.return_id_on_depth_stop,
                max_nesting: config.max_nesting,
            },
        })
    }
}

fn lookup<'a>(schema: &'a SchemaRegistry, name: &str) -> Result<&'a EntityDescriptor, ConfigError> {
    schema.by_name(name).ok_or_else(|| ConfigError::UnknownEntity {
        entity: name.to_string(),
        context: "schema".to_string(),
    })
}

/// The class itself followed by its ancestors
fn ancestor_chain(
    entity: &EntityBuilder,
    by_name: &HashMap<&str, &EntityBuilder>,
) -> Result<Vec<String>, ConfigError> {
    let mut chain = vec![entity.name.clone()];
    let mut current = entity;
    while let Some(parent) = &current.parent {
        if chain.contains(parent) {
            return Err(ConfigError::InvalidValue {
                field: format!("{}.extends", entity.name),
                value: parent.clone(),
                message: "inheritance cycle".to_string(),
            });
        }
        current = by_name
            .get(parent.as_str())
            .copied()
            .ok_or_else(|| ConfigError::UnknownEntity {
                entity: parent.clone(),
                context: format!("{} extends", current.name),
            })?;
        chain.push(parent.clone());
    }
    Ok(chain)
}

/// Fold the declarations of the chain, root-most ancestor first
fn flatten(
    key: EntityKey,
    entity: &EntityBuilder,
    chain: &[String],
    by_name: &HashMap<&str, &EntityBuilder>,
    keys: &HashMap<String, EntityKey>,
) -> Result<EntityDescriptor, ConfigError> {
    let mut columns = vec![ColumnDescriptor {
        name: "id".to_string(),
        scalar: ScalarType::Integer,
        nullable: false,
    }];
    let mut relations: Vec<RelationDecl> = Vec::new();
    let mut computed: Vec<ComputedProperty> = Vec::new();
    let mut unique = Vec::new();
    let mut constraints: IndexMap<String, Vec<FieldConstraint>> = IndexMap::new();
    let mut input_filters: IndexMap<String, Vec<InputFilter>> = IndexMap::new();
    let mut class_validators = Vec::new();
    let mut filters = Vec::new();

    for class in chain.iter().rev() {
        let Some(decl) = by_name.get(class.as_str()) else {
            continue;
        };
        for column in &decl.columns {
            upsert(&mut columns, column.clone(), |c| &c.name);
        }
        for relation in &decl.relations {
            upsert(&mut relations, relation.clone(), |r| &r.name);
        }
        for property in &decl.computed {
            upsert(&mut computed, property.clone(), |c| &c.name);
        }
        unique.extend(decl.unique.iter().cloned());
        for (property, list) in &decl.constraints {
            constraints
                .entry(property.clone())
                .or_default()
                .extend(list.iter().cloned());
        }
        for (property, list) in &decl.input_filters {
            input_filters
                .entry(property.clone())
                .or_default()
                .extend(list.iter().cloned());
        }
        class_validators.extend(decl.class_validators.iter().cloned());
        filters.extend(decl.filters.iter().cloned());
    }

    let relations = relations
        .into_iter()
        .map(|r| {
            let target = keys.get(&r.target).ok_or_else(|| ConfigError::UnknownEntity {
                entity: r.target.clone(),
                context: format!("relation {}.{}", entity.name, r.name),
            })?;
            Ok(RelationDescriptor {
                name: r.name,
                kind: r.kind,
                target: *target,
                target_table: r.target,
                inverse: r.inverse,
                owning: r.owning,
            })
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;

    Ok(EntityDescriptor {
        key,
        name: entity.name.clone(),
        ancestors: chain.to_vec(),
        columns,
        relations,
        computed,
        unique,
        constraints,
        input_filters,
        class_validators,
        filters,
    })
}

fn upsert<T>(items: &mut Vec<T>, item: T, name: impl Fn(&T) -> &String) {
    match items.iter().position(|existing| name(existing) == name(&item)) {
        Some(pos) => items[pos] = item,
        None => items.push(item),
    }
}

fn check_descriptor(descriptor: &EntityDescriptor, schema: &SchemaRegistry) -> Result<(), ConfigError> {
    let entity = &descriptor.name;
    let unknown_property = |property: &str, context: &str| ConfigError::UnknownProperty {
        entity: entity.clone(),
        property: property.to_string(),
        context: context.to_string(),
    };

    for relation in &descriptor.relations {
        let target = schema.target(relation);
        match &relation.inverse {
            Some(inverse) if target.relation(inverse).is_none() => {
                return Err(ConfigError::UnknownRelation {
                    entity: target.name.clone(),
                    relation: inverse.clone(),
                    context: format!("inverse of {}.{}", entity, relation.name),
                });
            }
            None if !relation.owning => {
                return Err(ConfigError::InvalidValue {
                    field: format!("{}.{}", entity, relation.name),
                    value: "mapped_by".to_string(),
                    message: "an inverse relation needs the name of its owning side".to_string(),
                });
            }
            _ => {}
        }
    }

    for property in &descriptor.computed {
        for dependency in &property.depends_on {
            let resolved = schema
                .walk_path(descriptor, dependency)
                .is_some_and(|(_, owner, last)| owner.has_property(last));
            if !resolved {
                return Err(unknown_property(
                    dependency,
                    &format!("computed property {}", property.name),
                ));
            }
        }
    }

    for set in &descriptor.unique {
        for property in set {
            let storable = descriptor.column(property).is_some()
                || descriptor
                    .relation(property)
                    .is_some_and(|r| r.foreign_key().is_some());
            if !storable {
                return Err(unknown_property(property, "unique constraint"));
            }
        }
    }
    for property in descriptor.constraints.keys() {
        if !descriptor.has_property(property) {
            return Err(unknown_property(property, "constraint"));
        }
    }
    for property in descriptor.input_filters.keys() {
        if descriptor.column(property).is_none() {
            return Err(unknown_property(property, "input filter"));
        }
    }
    Ok(())
}

fn register_exposures(
    entity: &EntityBuilder,
    schema: &SchemaRegistry,
    registry: &mut ExposureRegistry,
) -> Result<(), ConfigError> {
    let descriptor = lookup(schema, &entity.name)?;
    for decl in &entity.exposures {
        if !descriptor.has_property(&decl.property) {
            return Err(ConfigError::UnknownProperty {
                entity: entity.name.clone(),
                property: decl.property.clone(),
                context: "exposure".to_string(),
            });
        }
        if let Some(context) = &decl.context
            && schema.by_name(context).is_none()
        {
            return Err(ConfigError::UnknownEntity {
                entity: context.clone(),
                context: format!("exposure of {}.{}", entity.name, decl.property),
            });
        }
        let operations =
            Operation::parse_set(&decl.operations).map_err(|message| ConfigError::InvalidValue {
                field: format!("{}.{} exposure", entity.name, decl.property),
                value: decl.operations.join(","),
                message,
            })?;
        if decl.exposed {
            registry.register(&entity.name, &decl.property, &operations, decl.context.as_deref());
        } else {
            registry.deny(&entity.name, &decl.property, &operations, decl.context.as_deref());
        }
    }
    Ok(())
}

fn resolve_subresource(
    owner: &str,
    decl: &SubresourceDecl,
    schema: &SchemaRegistry,
) -> Result<SubresourceDescriptor, ConfigError> {
    let descriptor = lookup(schema, owner)?;
    let relation = descriptor
        .relation(&decl.relation)
        .ok_or_else(|| ConfigError::UnknownRelation {
            entity: owner.to_string(),
            relation: decl.relation.clone(),
            context: "subresource".to_string(),
        })?;
    let invalid = |message: &str| ConfigError::InvalidValue {
        field: format!("{}.{} subresource", owner, decl.relation),
        value: decl.relation.clone(),
        message: message.to_string(),
    };
    if !relation.is_many() {
        return Err(invalid("only collection relations can be subresources"));
    }
    let Some(inverse) = &relation.inverse else {
        return Err(invalid("a subresource needs an inverse relation"));
    };
    if decl
        .options
        .operations
        .iter()
        .any(|op| !matches!(op, Operation::List | Operation::Create))
    {
        return Err(invalid("subresources only serve list and create"));
    }
    let target = schema.target(relation);
    let inverse_many = target.relation(inverse).is_some_and(|r| r.is_many());

    Ok(SubresourceDescriptor {
        owner: owner.to_string(),
        relation: relation.name.clone(),
        segment: decl
            .options
            .segment
            .clone()
            .unwrap_or_else(|| relation.name.clone()),
        target: target.name.clone(),
        inverse: inverse.clone(),
        inverse_many,
        operations: decl.options.operations.clone(),
        max_depth: decl.options.max_depth,
    })
}
