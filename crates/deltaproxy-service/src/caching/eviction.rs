use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use super::cache_error::ConfigError;

/// Decides which objects leave the cache first once it grows beyond its capacity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "RawEvictionMethod")]
pub enum EvictionMethod {
    /// Evicts the object that was created first.
    #[default]
    Oldest,
    /// Evicts the object that was accessed least recently.
    Lru,
}

impl EvictionMethod {
    /// Returns the rank of an object under this method. Lower ranks are evicted first.
    pub fn rank(self, record: &EvictionRecord) -> u64 {
        match self {
            EvictionMethod::Oldest => record.created,
            EvictionMethod::Lru => record.last_access,
        }
    }
}

impl fmt::Display for EvictionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionMethod::Oldest => f.write_str("oldest"),
            EvictionMethod::Lru => f.write_str("lru"),
        }
    }
}

impl FromStr for EvictionMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "oldest" | "age" => Ok(EvictionMethod::Oldest),
            "lru" | "recency" => Ok(EvictionMethod::Lru),
            _ => match s.parse::<u64>() {
                Ok(id) => EvictionMethod::try_from(id),
                Err(_) => Err(ConfigError::UnknownEvictionMethod(s.to_owned())),
            },
        }
    }
}

/// Converts the legacy numeric identifiers of eviction methods.
impl TryFrom<u64> for EvictionMethod {
    type Error = ConfigError;

    fn try_from(id: u64) -> Result<Self, Self::Error> {
        match id {
            0 => Ok(EvictionMethod::Oldest),
            1 => Ok(EvictionMethod::Lru),
            _ => Err(ConfigError::UnknownEvictionMethod(id.to_string())),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEvictionMethod {
    Id(u64),
    Name(String),
}

impl TryFrom<RawEvictionMethod> for EvictionMethod {
    type Error = ConfigError;

    fn try_from(raw: RawEvictionMethod) -> Result<Self, Self::Error> {
        match raw {
            RawEvictionMethod::Id(id) => id.try_into(),
            RawEvictionMethod::Name(name) => name.parse(),
        }
    }
}

/// Recency and creation markers of a stored object.
///
/// Both markers are drawn from one store-wide monotonic sequence, so ranks are unique and the
/// eviction order is total.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EvictionRecord {
    pub last_access: u64,
    pub created: u64,
}

/// The current size of a store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Usage {
    pub objects: u64,
    pub bytes: u64,
}

impl Usage {
    pub fn remove(&mut self, bytes: u64) {
        self.objects = self.objects.saturating_sub(1);
        self.bytes = self.bytes.saturating_sub(bytes);
    }
}

/// A high-water and low-water mark for one capacity dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Watermark {
    pub high: u64,
    pub low: u64,
}

impl Watermark {
    /// Creates a watermark, with the low-water mark defaulting to the high-water mark.
    pub fn new(
        dimension: &'static str,
        high: Option<u64>,
        low: Option<u64>,
    ) -> Result<Option<Self>, ConfigError> {
        let Some(high) = high else {
            return Ok(None);
        };
        let low = low.unwrap_or(high);
        if low > high {
            return Err(ConfigError::InvalidWatermarks {
                dimension,
                low,
                high,
            });
        }
        Ok(Some(Self { high, low }))
    }
}

/// The capacity bounds of a store.
///
/// Eviction starts once either dimension exceeds its high-water mark, and continues until both
/// are at or below their low-water marks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Watermarks {
    pub bytes: Option<Watermark>,
    pub objects: Option<Watermark>,
}

impl Watermarks {
    pub fn exceeded(&self, usage: Usage) -> bool {
        self.bytes.is_some_and(|w| usage.bytes > w.high)
            || self.objects.is_some_and(|w| usage.objects > w.high)
    }

    pub fn satisfied(&self, usage: Usage) -> bool {
        self.bytes.is_none_or(|w| usage.bytes <= w.low)
            && self.objects.is_none_or(|w| usage.objects <= w.low)
    }
}

/// Picks the objects to evict so that `usage` drops below the low-water marks.
///
/// `candidates` yields every stored object with its eviction record and size. The victims are
/// returned in eviction order, and are empty unless a high-water mark is exceeded.
pub fn select_victims<K, I>(
    method: EvictionMethod,
    watermarks: &Watermarks,
    mut usage: Usage,
    candidates: I,
) -> Vec<K>
where
    I: IntoIterator<Item = (K, EvictionRecord, u64)>,
{
    if !watermarks.exceeded(usage) {
        return Vec::new();
    }

    let mut ranked: Vec<_> = candidates
        .into_iter()
        .map(|(key, record, size)| (method.rank(&record), key, size))
        .collect();
    ranked.sort_unstable_by_key(|(rank, _, _)| *rank);

    let mut victims = Vec::new();
    for (_, key, size) in ranked {
        if watermarks.satisfied(usage) {
            break;
        }
        usage.remove(size);
        victims.push(key);
    }
    victims
}
