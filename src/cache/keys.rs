//! Typed cache keys.

use std::fmt;
use std::str::FromStr;

/// A cache entry address. The variant selects the backing table and the
/// shape of the cached value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CacheKey {
  /// Review list for an airline (or other collection code)
  Reviews { collection_code: String },
  /// Jet-lag plan of one owner
  Plan { owner_id: String, plan_key: String },
  /// User profile
  Profile { owner_id: String },
  /// Synced flight list of one owner
  Flights { owner_id: String },
}

impl CacheKey {
  pub fn reviews(collection_code: impl Into<String>) -> Self {
    Self::Reviews {
      collection_code: collection_code.into(),
    }
  }

  pub fn plan(owner_id: impl Into<String>, plan_key: impl Into<String>) -> Self {
    Self::Plan {
      owner_id: owner_id.into(),
      plan_key: plan_key.into(),
    }
  }

  pub fn profile(owner_id: impl Into<String>) -> Self {
    Self::Profile {
      owner_id: owner_id.into(),
    }
  }

  pub fn flights(owner_id: impl Into<String>) -> Self {
    Self::Flights {
      owner_id: owner_id.into(),
    }
  }

  /// Type prefix of the string form.
  pub fn namespace(&self) -> &'static str {
    match self {
      Self::Reviews { .. } => "reviews",
      Self::Plan { .. } => "jetlag_plan",
      Self::Profile { .. } => "user_profile",
      Self::Flights { .. } => "my_flights",
    }
  }

  /// Human-readable description for logs.
  pub fn description(&self) -> String {
    match self {
      Self::Reviews { collection_code } => format!("reviews for {}", collection_code),
      Self::Plan { owner_id, plan_key } => format!("plan {} of {}", plan_key, owner_id),
      Self::Profile { owner_id } => format!("profile of {}", owner_id),
      Self::Flights { owner_id } => format!("flights of {}", owner_id),
    }
  }
}

/// `<namespace>:<subkey>`, with plans as `jetlag_plan:<owner>:<plan_key>`.
impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Reviews { collection_code } => write!(f, "{}:{}", self.namespace(), collection_code),
      Self::Plan { owner_id, plan_key } => {
        write!(f, "{}:{}:{}", self.namespace(), owner_id, plan_key)
      }
      Self::Profile { owner_id } | Self::Flights { owner_id } => {
        write!(f, "{}:{}", self.namespace(), owner_id)
      }
    }
  }
}

impl FromStr for CacheKey {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (namespace, subkey) = s
      .split_once(':')
      .ok_or_else(|| format!("cache key '{}' has no namespace", s))?;
    if subkey.is_empty() {
      return Err(format!("cache key '{}' has an empty subkey", s));
    }

    match namespace {
      "reviews" => Ok(Self::reviews(subkey)),
      "jetlag_plan" => match subkey.split_once(':') {
        Some((owner, plan)) if !owner.is_empty() && !plan.is_empty() => Ok(Self::plan(owner, plan)),
        _ => Err(format!("plan key '{}' must be <owner>:<plan_key>", subkey)),
      },
      "user_profile" => Ok(Self::profile(subkey)),
      "my_flights" => Ok(Self::flights(subkey)),
      other => Err(format!("unknown cache namespace '{}'", other)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn string_form_round_trips() {
    for key in [
      CacheKey::reviews("KE"),
      CacheKey::plan("u1", "icn:lax"),
      CacheKey::profile("u1"),
      CacheKey::flights("u1"),
    ] {
      assert_eq!(key.to_string().parse::<CacheKey>().unwrap(), key);
    }
  }

  #[test]
  fn plan_keys_split_on_first_colon_after_owner() {
    assert_eq!(
      "jetlag_plan:u1:icn:lax".parse::<CacheKey>().unwrap(),
      CacheKey::plan("u1", "icn:lax")
    );
    assert!("jetlag_plan:u1".parse::<CacheKey>().is_err());
  }

  #[test]
  fn rejects_unknown_or_malformed_keys() {
    assert!("weather:ICN".parse::<CacheKey>().is_err());
    assert!("reviews".parse::<CacheKey>().is_err());
    assert!("reviews:".parse::<CacheKey>().is_err());
  }
}
