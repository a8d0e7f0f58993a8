//! User snapshot shared by the user-creation saga participants.

use common::EntityId;
use serde::{Deserialize, Serialize};

use crate::DomainError;

const MIN_USERNAME_LEN: usize = 3;
const MAX_USERNAME_LEN: usize = 30;
const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
}

/// Account kind. Business accounts carry a company instead of a person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum UserType {
    #[default]
    Regular,
    Business,
}

/// A registered user as carried through the user-creation saga.
///
/// Each participating service keeps only the slice it owns: the
/// credentials service keeps username and password, the profile service
/// the personal data, the graph service a node keyed by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: EntityId,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub gender: Option<Gender>,
    #[serde(default)]
    pub age: u32,
    #[serde(default)]
    pub residence: String,
    pub email: String,
    pub username: String,
    /// Password hash as produced by the registering service.
    pub password: String,
    pub user_type: UserType,
    /// Public profiles can be followed without approval.
    pub visibility: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

impl User {
    /// Starts building a regular (personal) account.
    pub fn regular(username: impl Into<String>) -> UserBuilder {
        UserBuilder::new(UserType::Regular, username.into())
    }

    /// Starts building a business account.
    pub fn business(username: impl Into<String>) -> UserBuilder {
        UserBuilder::new(UserType::Business, username.into())
    }

    /// Returns true for private accounts.
    pub fn is_private(&self) -> bool {
        !self.visibility
    }

    /// Checks the invariants every service relies on.
    pub fn validate(&self) -> Result<(), DomainError> {
        let len = self.username.chars().count();
        if !(MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&len) {
            return Err(DomainError::user(
                "username",
                format!("must be {MIN_USERNAME_LEN}-{MAX_USERNAME_LEN} characters"),
            ));
        }
        if !self
            .username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        {
            return Err(DomainError::user(
                "username",
                "may only contain letters, digits, '_' and '.'",
            ));
        }

        match self.email.split_once('@') {
            Some((local, host)) if !local.is_empty() && host.contains('.') => {}
            _ => return Err(DomainError::user("email", "is not a valid address")),
        }

        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(DomainError::user(
                "password",
                format!("must be at least {MIN_PASSWORD_LEN} characters"),
            ));
        }

        match self.user_type {
            UserType::Regular => {
                if self.first_name.trim().is_empty() {
                    return Err(DomainError::user("first_name", "is required"));
                }
                if self.last_name.trim().is_empty() {
                    return Err(DomainError::user("last_name", "is required"));
                }
                if self.gender.is_none() {
                    return Err(DomainError::user("gender", "is required"));
                }
                if self.age == 0 {
                    return Err(DomainError::user("age", "must be positive"));
                }
            }
            UserType::Business => {
                let company = self.company_name.as_deref().unwrap_or_default();
                if company.trim().is_empty() {
                    return Err(DomainError::user("company_name", "is required"));
                }
            }
        }

        Ok(())
    }
}

/// Builder for [`User`]; `build` validates the result.
#[derive(Debug, Clone)]
pub struct UserBuilder {
    user: User,
}

impl UserBuilder {
    fn new(user_type: UserType, username: String) -> Self {
        Self {
            user: User {
                id: EntityId::new(),
                first_name: String::new(),
                last_name: String::new(),
                gender: None,
                age: 0,
                residence: String::new(),
                email: String::new(),
                username,
                password: String::new(),
                user_type,
                visibility: true,
                company_name: None,
                website: None,
            },
        }
    }

    pub fn id(mut self, id: EntityId) -> Self {
        self.user.id = id;
        self
    }

    pub fn name(mut self, first: impl Into<String>, last: impl Into<String>) -> Self {
        self.user.first_name = first.into();
        self.user.last_name = last.into();
        self
    }

    pub fn gender(mut self, gender: Gender) -> Self {
        self.user.gender = Some(gender);
        self
    }

    pub fn age(mut self, age: u32) -> Self {
        self.user.age = age;
        self
    }

    pub fn residence(mut self, residence: impl Into<String>) -> Self {
        self.user.residence = residence.into();
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.user.email = email.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.user.password = password.into();
        self
    }

    pub fn private(mut self) -> Self {
        self.user.visibility = false;
        self
    }

    pub fn company(mut self, name: impl Into<String>, website: Option<String>) -> Self {
        self.user.company_name = Some(name.into());
        self.user.website = website;
        self
    }

    /// Validates and returns the user.
    pub fn build(self) -> Result<User, DomainError> {
        self.user.validate()?;
        Ok(self.user)
    }
}
