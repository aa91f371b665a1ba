//! Mapping between demo records and datastore entities.
//!
//! Demos live under their owner: `User(<username>)/Demo(<id>)`. The owner's
//! `User` entity doubles as the name reservation counter, so a demo and its
//! owner's counter share an entity group.

use demokit_datastore::{EmbeddedEntity, Entity, Key, PropertyMap, Value};

use crate::deployment::DeploymentTemplate;
use crate::error::{ControlError, ControlResult};
use crate::types::{Demo, DemoId, DemoStatus, Resource, UserCounter, Username};

/// Kind of per-user root entities.
pub const USER_KIND: &str = "User";
/// Kind of demo entities.
pub const DEMO_KIND: &str = "Demo";

/// Indexed status label.
pub const STATUS: &str = "status";
/// Indexed creation timestamp.
pub const CREATION_TIME: &str = "creationTime";
/// Unindexed description.
pub const DESCRIPTION: &str = "description";
/// Embedded deployment template.
pub const DEPLOYMENT_TEMPLATE: &str = "deploymentTemplate";
/// List of embedded resources.
pub const RESOURCES: &str = "resources";
/// Next unreserved name suffix on a `User` entity.
pub const CURRENT_SUFFIX: &str = "currentResourceNameSuffix";

const RESOURCE_TYPE: &str = "resourceType";
const COMPUTE_INSTANCE: &str = "COMPUTE_INSTANCE";
const NAME: &str = "name";
const ZONE: &str = "zone";

/// Key of a user's root entity.
#[must_use]
pub fn user_key(user: &Username) -> Key {
    Key::named(USER_KIND, user.as_str())
}

/// Key of one of a user's demos.
#[must_use]
pub fn demo_key(user: &Username, id: DemoId) -> Key {
    user_key(user).child_numbered(DEMO_KIND, id.get())
}

/// Stored properties of a demo. Synthetic fields are never written.
pub fn demo_properties(
    status: DemoStatus,
    description: &str,
    creation_time: chrono::DateTime<chrono::Utc>,
    template: &DeploymentTemplate,
    resources: &[Resource],
) -> ControlResult<PropertyMap> {
    let resources = resources
        .iter()
        .map(|resource| Value::Embedded(resource_to_embedded(resource)))
        .collect();

    Ok(PropertyMap::new()
        .with(STATUS, status.as_str())
        .with(CREATION_TIME, creation_time)
        .with(DESCRIPTION, Value::Text(description.to_owned()))
        .with(DEPLOYMENT_TEMPLATE, template.to_embedded()?)
        .with(RESOURCES, Value::List(resources)))
}

/// Encode a demo owned by `user`.
pub fn demo_to_entity(user: &Username, demo: &Demo) -> ControlResult<Entity> {
    let properties = demo_properties(
        demo.status,
        &demo.description,
        demo.creation_time,
        &demo.deployment_template,
        &demo.resources,
    )?;
    Ok(Entity::with_properties(demo_key(user, demo.id), properties))
}

/// Decode a demo entity, returning its owner alongside it.
///
/// A legacy `ACTIVE` status decodes as [`DemoStatus::Created`].
pub fn demo_from_entity(entity: &Entity) -> ControlResult<(Username, Demo)> {
    let key = &entity.key;
    if key.kind() != DEMO_KIND {
        return Err(ControlError::internal(format!("{key} is not a demo key")));
    }
    let id = key
        .numeric_id()
        .map(DemoId::new)
        .ok_or_else(|| ControlError::internal(format!("demo key {key} has no numeric id")))?;
    let owner = key
        .parent()
        .filter(|parent| parent.kind() == USER_KIND)
        .and_then(Key::name)
        .ok_or_else(|| ControlError::internal(format!("demo key {key} has no owning user")))?;

    let props = &entity.properties;
    let status = props.get_str(STATUS)?.parse()?;
    let resources = props
        .get_list(RESOURCES)?
        .iter()
        .map(|value| match value {
            Value::Embedded(embedded) => resource_from_embedded(embedded),
            other => Err(ControlError::invalid_state(format!(
                "resource entry is a {}, not an embedded entity",
                other.type_name()
            ))),
        })
        .collect::<ControlResult<Vec<_>>>()?;

    let demo = Demo {
        id,
        status,
        description: props.get_opt_str(DESCRIPTION)?.unwrap_or_default().to_owned(),
        creation_time: props.get_timestamp(CREATION_TIME)?,
        deployment_template: DeploymentTemplate::from_embedded(
            props.get_embedded(DEPLOYMENT_TEMPLATE)?,
        )?,
        resources,
        deployment_status: None,
        deployment_metadata: std::collections::BTreeMap::new(),
    };

    Ok((Username::new(owner)?, demo))
}

/// Encode a resource, tag first.
#[must_use]
pub fn resource_to_embedded(resource: &Resource) -> EmbeddedEntity {
    match resource {
        Resource::ComputeInstance {
            name,
            creation_time,
            zone,
        } => PropertyMap::new()
            .with(RESOURCE_TYPE, COMPUTE_INSTANCE)
            .with(NAME, name.as_str())
            .with(CREATION_TIME, *creation_time)
            .with(ZONE, zone.as_str()),
    }
}

/// Decode a resource. Unknown tags are an invalid-state error.
pub fn resource_from_embedded(embedded: &EmbeddedEntity) -> ControlResult<Resource> {
    match embedded.get_str(RESOURCE_TYPE)? {
        COMPUTE_INSTANCE => Ok(Resource::ComputeInstance {
            name: embedded.get_str(NAME)?.to_owned(),
            creation_time: embedded.get_timestamp(CREATION_TIME)?,
            zone: embedded.get_str(ZONE)?.to_owned(),
        }),
        other => Err(ControlError::invalid_state(format!(
            "unknown resource type: {other}"
        ))),
    }
}

/// Encode a user's name reservation counter.
pub fn counter_to_entity(counter: &UserCounter) -> ControlResult<Entity> {
    let suffix = i64::try_from(counter.current_suffix).map_err(|_| {
        ControlError::internal(format!(
            "name suffix {} for user {} does not fit the store",
            counter.current_suffix, counter.username
        ))
    })?;
    Ok(Entity::with_properties(
        user_key(&counter.username),
        PropertyMap::new().with(CURRENT_SUFFIX, suffix),
    ))
}

/// Decode a user's counter. An absent entity is a counter at zero.
pub fn counter_from_entity(user: &Username, entity: Option<&Entity>) -> ControlResult<UserCounter> {
    let Some(entity) = entity else {
        return Ok(UserCounter::new(user.clone()));
    };
    let stored = match entity.properties.get(CURRENT_SUFFIX) {
        None | Some(Value::Null) => 0,
        Some(_) => entity.properties.get_i64(CURRENT_SUFFIX)?,
    };
    let current_suffix = u64::try_from(stored).map_err(|_| {
        ControlError::invalid_state(format!("negative name suffix {stored} for user {user}"))
    })?;
    Ok(UserCounter {
        username: user.clone(),
        current_suffix,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::compute::InstanceSpec;
    use crate::config::ComputeConfig;

    fn alice() -> Username {
        Username::new("alice").unwrap()
    }

    fn demo() -> Demo {
        Demo {
            id: DemoId::new(42),
            status: DemoStatus::Launched,
            description: "a demo".to_owned(),
            creation_time: Utc::now(),
            deployment_template: DeploymentTemplate::single_instance(InstanceSpec::with_defaults(
                "alice-0",
                &ComputeConfig::default(),
            )),
            resources: vec![Resource::ComputeInstance {
                name: "alice-0".to_owned(),
                creation_time: Utc::now(),
                zone: "us-central1-a".to_owned(),
            }],
            deployment_status: Some("RUNNING".to_owned()),
            deployment_metadata: [("sshURL".to_owned(), "https://example".to_owned())]
                .into_iter()
                .collect(),
        }
    }

    #[test]
    fn demo_entity_layout() {
        let entity = demo_to_entity(&alice(), &demo()).unwrap();

        assert_eq!(entity.key, demo_key(&alice(), DemoId::new(42)));
        assert_eq!(entity.key.root(), &user_key(&alice()));
        assert_eq!(entity.properties.get_str(STATUS).unwrap(), "LAUNCHED");
        assert!(matches!(entity.properties.get(DESCRIPTION), Some(Value::Text(_))));
        assert_eq!(entity.properties.get_list(RESOURCES).unwrap().len(), 1);
        assert!(entity.properties.get("deploymentStatus").is_none());
    }

    #[test]
    fn decoding_drops_synthetic_fields() {
        let original = demo();
        let entity = demo_to_entity(&alice(), &original).unwrap();
        let (owner, decoded) = demo_from_entity(&entity).unwrap();

        assert_eq!(owner, alice());
        assert_eq!(decoded.id, original.id);
        assert_eq!(decoded.deployment_template, original.deployment_template);
        assert_eq!(decoded.resources, original.resources);
        assert!(decoded.deployment_status.is_none());
        assert!(decoded.deployment_metadata.is_empty());
    }

    #[test]
    fn legacy_active_status_reads_as_created() {
        let mut entity = demo_to_entity(&alice(), &demo()).unwrap();
        entity.properties.set(STATUS, "ACTIVE");

        let (_, decoded) = demo_from_entity(&entity).unwrap();
        assert_eq!(decoded.status, DemoStatus::Created);

        let rewritten = demo_to_entity(&alice(), &decoded).unwrap();
        assert_eq!(rewritten.properties.get_str(STATUS).unwrap(), "CREATED");
    }

    #[test]
    fn unknown_status_is_invalid_state() {
        let mut entity = demo_to_entity(&alice(), &demo()).unwrap();
        entity.properties.set(STATUS, "PAUSED");
        assert!(matches!(
            demo_from_entity(&entity),
            Err(ControlError::InvalidState(_))
        ));
    }

    #[test]
    fn records_without_resources_decode_empty() {
        let mut entity = demo_to_entity(&alice(), &demo()).unwrap();
        entity.properties.remove(RESOURCES);
        let (_, decoded) = demo_from_entity(&entity).unwrap();
        assert!(decoded.resources.is_empty());
    }

    #[test]
    fn unknown_resource_type_is_rejected() {
        let embedded = PropertyMap::new().with(RESOURCE_TYPE, "DISK");
        assert!(matches!(
            resource_from_embedded(&embedded),
            Err(ControlError::InvalidState(_))
        ));
    }

    #[test]
    fn counter_defaults_to_zero_when_absent() {
        let counter = counter_from_entity(&alice(), None).unwrap();
        assert_eq!(counter.current_suffix, 0);

        let entity = counter_to_entity(&UserCounter {
            username: alice(),
            current_suffix: 9,
        })
        .unwrap();
        assert_eq!(entity.key, user_key(&alice()));
        assert_eq!(
            counter_from_entity(&alice(), Some(&entity)).unwrap().current_suffix,
            9
        );
    }
}
