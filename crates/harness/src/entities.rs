use chrono::{DateTime, Utc};
use jans_orm_core::{AttributeEnum, AttributeFlags, CustomAttribute, EntityDescriptor, Entry, PersistenceError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const PEOPLE_BASE: &str = "ou=people,o=jans";
pub const CLIENTS_BASE: &str = "ou=clients,o=jans";

/// Fresh entry id, time-ordered so generated rows sort by creation.
pub fn new_inum() -> String {
    Uuid::now_v7().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Female,
    Male,
    Other,
}

impl AttributeEnum for Gender {
    fn value(&self) -> &'static str {
        match self {
            Gender::Female => "female",
            Gender::Male => "male",
            Gender::Other => "other",
        }
    }

    fn from_value(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "female" => Some(Gender::Female),
            "male" => Some(Gender::Male),
            "other" => Some(Gender::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub locality: String,
    pub country: String,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Person {
    pub dn: Option<String>,
    pub inum: Option<String>,
    pub uid: Option<String>,
    pub display_name: Option<String>,
    pub mail: Vec<String>,
    pub gender: Option<Gender>,
    pub active: Option<bool>,
    pub login_count: Option<i32>,
    pub created_at: Option<DateTime<Utc>>,
    /// Written by the login flow; a merge never clears it.
    pub last_logon: Option<DateTime<Utc>>,
    pub password: Option<String>,
    pub address: Option<Address>,
    pub member_of: Vec<String>,
    pub object_classes: Vec<String>,
    pub custom_attributes: Vec<CustomAttribute>,
}

impl Person {
    pub fn new(uid: &str) -> Self {
        Self::with_inum(&new_inum(), uid)
    }

    pub fn with_inum(inum: &str, uid: &str) -> Self {
        Self {
            dn: Some(format!("inum={inum},{PEOPLE_BASE}")),
            inum: Some(inum.to_string()),
            uid: Some(uid.to_string()),
            ..Self::default()
        }
    }

    pub fn dn(&self) -> &str {
        self.dn.as_deref().unwrap_or_default()
    }
}

impl Entry for Person {
    fn descriptor() -> Result<EntityDescriptor<Self>, PersistenceError> {
        EntityDescriptor::<Self>::builder(["jansPerson", "top"])
            .dn(|p| &p.dn, |p| &mut p.dn)
            .custom_object_classes(|p| &p.object_classes, |p| &mut p.object_classes)
            .text("inum", |p| &p.inum, |p| &mut p.inum, AttributeFlags::default().required())
            .text("uid", |p| &p.uid, |p| &mut p.uid, AttributeFlags::default())
            .text("displayName", |p| &p.display_name, |p| &mut p.display_name, AttributeFlags::default())
            .text_list("mail", |p| &p.mail, |p| &mut p.mail, AttributeFlags::default())
            .enumerated("gender", |p| &p.gender, |p| &mut p.gender, AttributeFlags::default())
            .boolean("jansActive", |p| &p.active, |p| &mut p.active, AttributeFlags::default())
            .integer("jansLoginCount", |p| &p.login_count, |p| &mut p.login_count, AttributeFlags::default())
            .timestamp(
                "jansCreationTimestamp",
                |p| &p.created_at,
                |p| &mut p.created_at,
                AttributeFlags::default(),
            )
            .timestamp(
                "jansLastLogonTime",
                |p| &p.last_logon,
                |p| &mut p.last_logon,
                AttributeFlags::default().update_only(),
            )
            .text(
                "userPassword",
                |p| &p.password,
                |p| &mut p.password,
                AttributeFlags::default().ignore_during_read(),
            )
            .json("jansAddress", |p| &p.address, |p| &mut p.address, AttributeFlags::default())
            .text_list("memberOf", |p| &p.member_of, |p| &mut p.member_of, AttributeFlags::default())
            .attributes_list(|p| &p.custom_attributes, |p| &mut p.custom_attributes, true, &[])
            .build()
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Client {
    pub dn: Option<String>,
    pub inum: Option<String>,
    pub display_name: Option<String>,
    pub redirect_uris: Vec<String>,
    pub scopes: Vec<String>,
    pub disabled: Option<bool>,
    pub secret_expires_at: Option<DateTime<Utc>>,
    pub access_token_lifetime: Option<i64>,
}

impl Client {
    pub fn new(display_name: &str) -> Self {
        let inum = new_inum();
        Self {
            dn: Some(format!("inum={inum},{CLIENTS_BASE}")),
            inum: Some(inum),
            display_name: Some(display_name.to_string()),
            ..Self::default()
        }
    }

    pub fn dn(&self) -> &str {
        self.dn.as_deref().unwrap_or_default()
    }
}

impl Entry for Client {
    fn descriptor() -> Result<EntityDescriptor<Self>, PersistenceError> {
        EntityDescriptor::<Self>::builder(["jansClnt", "top"])
            .dn(|c| &c.dn, |c| &mut c.dn)
            .text("inum", |c| &c.inum, |c| &mut c.inum, AttributeFlags::default().required())
            .text("displayName", |c| &c.display_name, |c| &mut c.display_name, AttributeFlags::default())
            .text_list("jansRedirectURI", |c| &c.redirect_uris, |c| &mut c.redirect_uris, AttributeFlags::default())
            .text_list("jansScope", |c| &c.scopes, |c| &mut c.scopes, AttributeFlags::default())
            .boolean("jansDisabled", |c| &c.disabled, |c| &mut c.disabled, AttributeFlags::default())
            .timestamp(
                "jansClntSecretExpAt",
                |c| &c.secret_expires_at,
                |c| &mut c.secret_expires_at,
                AttributeFlags::default(),
            )
            .long(
                "jansAccessTknLife",
                |c| &c.access_token_lifetime,
                |c| &mut c.access_token_lifetime,
                AttributeFlags::default(),
            )
            .build()
    }
}
