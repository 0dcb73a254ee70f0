use argon2::{Variant, Version};
use derive_more::{Deref, Display, Error};
use lazy_regex::regex_is_match;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use time::OffsetDateTime;
use typesafe_repository::macros::Id;
use typesafe_repository::{GetIdentity, Identity, RefIdentity};

pub mod repository;
pub mod service;

pub const HASH_LENGTH: u32 = 32;
pub const SALT_LENGTH: usize = 32;
pub const MIN_PASSWORD_LENGTH: usize = 6;
pub const STARTING_BALANCE: Decimal = dec!(1000);
pub const DEFAULT_ARGON_CONFIG: argon2::Config = argon2::Config {
    variant: Variant::Argon2id,
    version: Version::Version13,
    mem_cost: 19456,
    time_cost: 2,
    lanes: 1,
    secret: &[],
    ad: &[],
    hash_length: HASH_LENGTH,
};

pub type Salt = [u8; SALT_LENGTH];

pub fn generate_salt() -> Salt {
    let mut salt = [0; SALT_LENGTH];
    StdRng::from_entropy().fill_bytes(&mut salt);
    salt
}

/// Lowercased e-mail address identifying a user.
#[derive(
    Deref, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Display,
)]
#[serde(transparent)]
pub struct Login(pub String);

impl Login {
    pub fn parse(raw: &str) -> Result<Self, AccountError> {
        let email = raw.trim().to_lowercase();
        if regex_is_match!(r"^[^@\s]+@[^@\s]+\.[^@\s]+$", &email) {
            Ok(Self(email))
        } else {
            Err(AccountError::InvalidEmail)
        }
    }
}

#[derive(Clone, Debug, Deref, PartialEq)]
pub struct Password {
    #[deref]
    password: String,
    salt: Salt,
}

impl Password {
    /// Restores an already hashed password.
    pub fn new(password: String, salt: Salt) -> Self {
        Self { password, salt }
    }

    pub fn generate(input: &str, salt: Salt) -> Result<Password, anyhow::Error> {
        if input.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AccountError::PasswordTooShort.into());
        }
        let password = argon2::hash_encoded(input.as_bytes(), &salt, &DEFAULT_ARGON_CONFIG)?;
        Ok(Self { password, salt })
    }

    pub fn check(&self, input: &str) -> Result<bool, anyhow::Error> {
        Ok(argon2::verify_encoded(&self.password, input.as_bytes())?)
    }

    pub fn salt(&self) -> &Salt {
        &self.salt
    }

    pub fn password(&self) -> &String {
        &self.password
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Plan {
    Free,
    Pro,
    Business,
}

impl Plan {
    pub fn price(&self) -> Decimal {
        match self {
            Self::Free => Decimal::ZERO,
            Self::Pro => dec!(1990),
            Self::Business => dec!(4990),
        }
    }
}

impl FromStr for Plan {
    type Err = AccountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "pro" => Ok(Self::Pro),
            "business" => Ok(Self::Business),
            _ => Err(AccountError::UnknownPlan),
        }
    }
}

#[derive(Id, Debug, Clone)]
#[Id(ref_id, get_id)]
pub struct UserCredentials {
    #[id]
    pub login: Login,
    pub password: Password,
    pub balance: Decimal,
    pub subscription: Plan,
    pub created_at: OffsetDateTime,
    pub last_login: Option<OffsetDateTime>,
    pub total_analyses: u64,
}

impl UserCredentials {
    pub fn new(login: Login, password: Password, now: OffsetDateTime) -> Self {
        Self {
            login,
            password,
            balance: STARTING_BALANCE,
            subscription: Plan::Pro,
            created_at: now,
            last_login: None,
            total_analyses: 0,
        }
    }

    pub fn top_up(&mut self, amount: Decimal) -> Result<(), AccountError> {
        if amount <= Decimal::ZERO {
            return Err(AccountError::NonPositiveAmount);
        }
        self.balance += amount;
        Ok(())
    }

    /// Switches to `plan`, charging its price. Returns the amount charged.
    pub fn upgrade(&mut self, plan: Plan) -> Result<Decimal, AccountError> {
        let price = plan.price();
        if self.balance < price {
            return Err(AccountError::InsufficientBalance {
                required: price,
                available: self.balance,
            });
        }
        self.balance -= price;
        self.subscription = plan;
        Ok(price)
    }

    pub fn record_analysis(&mut self) {
        self.total_analyses = self.total_analyses.saturating_add(1);
    }
}

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum AccountError {
    #[display("Invalid email address")]
    InvalidEmail,
    #[display("Password must be at least 6 characters long")]
    PasswordTooShort,
    #[display("User with this email already exists")]
    LoginTaken,
    #[display("Invalid email or password")]
    InvalidCredentials,
    #[display("User not found")]
    UnknownUser,
    #[display("Unknown subscription plan")]
    UnknownPlan,
    #[display("Amount must be positive")]
    NonPositiveAmount,
    #[display("Insufficient balance: {required} required, {available} available")]
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
    },
}
