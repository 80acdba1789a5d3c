use std::fmt::{self, Write};
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// A stable key identifying a query independently of its requested time range.
///
/// Two requests with the same fingerprint address the same cached series, so the key is derived
/// from everything that shapes the response except the time range itself.
#[derive(Debug, Clone, Eq)]
pub struct Fingerprint {
    metadata: Arc<str>,
    hash: [u8; 32],
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.hash {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl std::hash::Hash for Fingerprint {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl Fingerprint {
    /// Creates a [`FingerprintBuilder`] for a query against the given backend.
    pub fn builder(backend: &str) -> FingerprintBuilder {
        FingerprintBuilder {
            metadata: format!("backend: {backend}\n"),
            path: None,
            params: Vec::new(),
            headers: Vec::new(),
            excluded_params: Vec::new(),
        }
    }

    /// Creates a fingerprint directly from a pre-normalized key.
    pub fn from_raw(key: impl Into<String>) -> Self {
        FingerprintBuilder {
            metadata: key.into(),
            path: None,
            params: Vec::new(),
            headers: Vec::new(),
            excluded_params: Vec::new(),
        }
        .build()
    }

    /// Returns the human-readable metadata that forms the basis of the [`Fingerprint`].
    pub fn metadata(&self) -> &str {
        &self.metadata
    }
}

/// A builder for [`Fingerprint`]s.
///
/// The builder normalizes its inputs so that semantically equal queries end up with the same key:
/// parameter and header names are lower-cased, parameters are sorted, and time range parameters
/// are left out. Additional stable metadata can be appended through the [`Write`] implementation.
pub struct FingerprintBuilder {
    metadata: String,
    path: Option<String>,
    params: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    excluded_params: Vec<String>,
}

impl FingerprintBuilder {
    /// Sets the request path of the query.
    pub fn path(mut self, path: &str) -> Self {
        self.path = Some(path.to_owned());
        self
    }

    /// Adds a query parameter.
    pub fn param(mut self, name: &str, value: &str) -> Self {
        self.params.push((name.to_lowercase(), value.to_owned()));
        self
    }

    /// Adds all the given query parameters.
    pub fn params<'a, I>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (name, value) in params {
            self = self.param(name, value);
        }
        self
    }

    /// Adds a request header that influences the response, such as a tenant id.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_lowercase(), value.to_owned()));
        self
    }

    /// Sets the names of parameters that carry the time range and must not be part of the key.
    pub fn exclude_params<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.excluded_params = names
            .into_iter()
            .map(|name| name.as_ref().to_lowercase())
            .collect();
        self
    }

    /// Finalize the [`Fingerprint`].
    pub fn build(self) -> Fingerprint {
        let Self {
            mut metadata,
            path,
            mut params,
            mut headers,
            excluded_params,
        } = self;

        params.retain(|(name, _)| !excluded_params.contains(name));
        params.sort();
        headers.sort();

        // Writing into a `String` is infallible.
        if let Some(path) = path {
            let _ = writeln!(metadata, "path: {path}");
        }
        for (name, value) in &params {
            let _ = writeln!(metadata, "param: {name}={value}");
        }
        for (name, value) in &headers {
            let _ = writeln!(metadata, "header: {name}: {value}");
        }

        let hash: [u8; 32] = Sha256::digest(&metadata).into();

        Fingerprint {
            metadata: metadata.into(),
            hash,
        }
    }
}

impl fmt::Write for FingerprintBuilder {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.metadata.write_str(s)
    }
}
