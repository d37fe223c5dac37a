use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

/// Identity of the resource that owns generated children.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnerIdentity {
    pub name: String,
    pub namespace: String,
    pub uid: Option<String>,
    pub api_version: String,
    pub kind: String,
}

impl OwnerIdentity {
    /// Capture the identity of a live object. Objects without a namespace land in "default".
    pub fn of<K>(obj: &K) -> Self
    where
        K: Resource<DynamicType = ()>,
    {
        Self {
            name: obj.name_any(),
            namespace: obj.namespace().unwrap_or_else(|| "default".to_string()),
            uid: obj.uid(),
            api_version: K::api_version(&()).into_owned(),
            kind: K::kind(&()).into_owned(),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("owner {0} has no uid; it must be read back from the API server first")]
    MissingUid(String),
    #[error("owner {name} has unknown type (apiVersion={api_version:?}, kind={kind:?})")]
    UnknownOwnerType {
        name: String,
        api_version: String,
        kind: String,
    },
    #[error("{child} already has controller {existing}")]
    AlreadyControlled { child: String, existing: String },
}

/// Records a parent/child edge on a child object so deleting the parent cascades.
pub trait OwnerLinker: std::fmt::Debug {
    fn link_owner(
        &self,
        child: &mut ObjectMeta,
        owner: &OwnerIdentity,
    ) -> Result<(), LinkError>;
}

/// Sets a controller owner reference, mirroring what the API server garbage collector expects.
#[derive(Clone, Debug, Default)]
pub struct ControllerOwnerLinker;

impl OwnerLinker for ControllerOwnerLinker {
    fn link_owner(
        &self,
        child: &mut ObjectMeta,
        owner: &OwnerIdentity,
    ) -> Result<(), LinkError> {
        if owner.api_version.is_empty() || owner.kind.is_empty() {
            return Err(LinkError::UnknownOwnerType {
                name: owner.name.clone(),
                api_version: owner.api_version.clone(),
                kind: owner.kind.clone(),
            });
        }
        let uid = owner
            .uid
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| LinkError::MissingUid(owner.name.clone()))?;

        let refs = child.owner_references.get_or_insert_with(Vec::new);
        if let Some(existing) = refs
            .iter()
            .find(|r| r.controller == Some(true) && r.uid != uid)
        {
            return Err(LinkError::AlreadyControlled {
                child: child.name.clone().unwrap_or_default(),
                existing: format!("{}/{}", existing.kind, existing.name),
            });
        }
        refs.retain(|r| r.uid != uid);
        refs.push(OwnerReference {
            api_version: owner.api_version.clone(),
            kind: owner.kind.clone(),
            name: owner.name.clone(),
            uid: uid.to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        });
        Ok(())
    }
}
