use crate::Secret;
use k8s_openapi::ByteString;

/// Connection details for one filer bucket, read from a Secret.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct CredentialRecord {
    /// Name of the Secret the record was read from.
    pub source_name: String,

    /// Bucket to mount, possibly followed by a share path (`bucket/dir/sub`).
    pub mount_path: String,

    pub endpoint_url: String,
    pub access_key: String,
    pub secret_key: String,
}

const MOUNT_PATH_KEY: &str = "S3_BUCKET";
const ENDPOINT_URL_KEY: &str = "S3_URL";
const ACCESS_KEY_KEY: &str = "S3_ACCESS";
const SECRET_KEY_KEY: &str = "S3_SECRET";

/// Used when a secret name has no `-` separated prefix.
const UNKNOWN_FILER: &str = "error";

// === impl CredentialRecord ===

impl CredentialRecord {
    /// Reads every Secret whose name contains `marker`, preserving the listing
    /// order.
    pub fn from_secrets<'s>(
        secrets: impl IntoIterator<Item = &'s Secret>,
        marker: &str,
    ) -> Vec<Self> {
        secrets
            .into_iter()
            .filter(|secret| {
                secret
                    .metadata
                    .name
                    .as_deref()
                    .is_some_and(|name| name.contains(marker))
            })
            .map(Self::from_secret)
            .collect()
    }

    pub fn from_secret(secret: &Secret) -> Self {
        let data = |key: &str| {
            secret
                .data
                .as_ref()
                .and_then(|data| data.get(key))
                .map(|ByteString(bytes)| String::from_utf8_lossy(bytes).into_owned())
                .unwrap_or_default()
        };

        Self {
            source_name: secret.metadata.name.clone().unwrap_or_default(),
            mount_path: data(MOUNT_PATH_KEY),
            endpoint_url: data(ENDPOINT_URL_KEY),
            access_key: data(ACCESS_KEY_KEY),
            secret_key: data(SECRET_KEY_KEY),
        }
    }

    /// The short filer identifier: the first `-` separated segment of the
    /// secret name (`sasfs40-filer-conn-secret` is `sasfs40`).
    pub fn filer(&self) -> &str {
        match self.source_name.split_once('-') {
            Some((filer, _)) => filer,
            None => UNKNOWN_FILER,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.missing_fields().is_empty()
    }

    /// Names of the data keys that are absent or empty.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            (MOUNT_PATH_KEY, &self.mount_path),
            (ENDPOINT_URL_KEY, &self.endpoint_url),
            (ACCESS_KEY_KEY, &self.access_key),
            (SECRET_KEY_KEY, &self.secret_key),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(key, _)| key)
        .collect()
    }
}

// Keys must never end up in logs.
impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("source_name", &self.source_name)
            .field("mount_path", &self.mount_path)
            .field("endpoint_url", &self.endpoint_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ObjectMeta;

    fn mk_secret(name: &str, data: &[(&str, &str)]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("ns-0".to_string()),
                ..Default::default()
            },
            data: Some(
                data.iter()
                    .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    fn full() -> Vec<(&'static str, &'static str)> {
        vec![
            ("S3_BUCKET", "bucket/share"),
            ("S3_URL", "https://s3.example.com"),
            ("S3_ACCESS", "AKIA"),
            ("S3_SECRET", "shh"),
        ]
    }

    #[test]
    fn reads_secret_data() {
        let record = CredentialRecord::from_secret(&mk_secret("fs1-filer-conn-secret", &full()));
        assert_eq!(record.source_name, "fs1-filer-conn-secret");
        assert_eq!(record.mount_path, "bucket/share");
        assert_eq!(record.endpoint_url, "https://s3.example.com");
        assert_eq!(record.access_key, "AKIA");
        assert_eq!(record.secret_key, "shh");
        assert_eq!(record.filer(), "fs1");
        assert!(record.is_valid());
    }

    #[test]
    fn filters_by_marker_in_listing_order() {
        let secrets = vec![
            mk_secret("b-filer-conn-secret", &full()),
            mk_secret("default-token", &full()),
            mk_secret("a-filer-conn-secret", &full()),
        ];
        let names = CredentialRecord::from_secrets(&secrets, "filer-conn-secret")
            .into_iter()
            .map(|r| r.source_name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["b-filer-conn-secret", "a-filer-conn-secret"]);
    }

    #[test]
    fn reports_missing_fields() {
        let secret = mk_secret(
            "fs1-filer-conn-secret",
            &[("S3_BUCKET", "bucket"), ("S3_URL", ""), ("S3_SECRET", "shh")],
        );
        let record = CredentialRecord::from_secret(&secret);
        assert!(!record.is_valid());
        assert_eq!(record.missing_fields(), vec!["S3_URL", "S3_ACCESS"]);

        let mut empty = mk_secret("fs1-filer-conn-secret", &[]);
        empty.data = None;
        assert_eq!(CredentialRecord::from_secret(&empty).missing_fields().len(), 4);
    }

    #[test]
    fn unknown_filer_without_separator() {
        let record = CredentialRecord {
            source_name: "filerconn".to_string(),
            ..Default::default()
        };
        assert_eq!(record.filer(), "error");
    }

    #[test]
    fn debug_omits_keys() {
        let record = CredentialRecord::from_secret(&mk_secret("fs1-filer-conn-secret", &full()));
        let debug = format!("{record:?}");
        assert!(!debug.contains("AKIA"));
        assert!(!debug.contains("shh"));
    }
}
