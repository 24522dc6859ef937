//! S3-compatible object store.
//!
//! Plain path-style PUT/GET with AWS signature version 2, which every
//! S3-compatible endpoint still accepts and which needs nothing beyond an
//! HMAC. Object layout matches the file backend; the `defaultSecrets`
//! object holds the default keyring id rather than a symlink.

use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::sign::Signer;
use reqwest::blocking::Client;
use reqwest::StatusCode;

use crate::error::{Error, Result};

use super::{chunk_rel_path, Backend};

const SECRETS_CONTENT_TYPE: &str = "application/vnd.cypherback.secrets";
const SECRETS_ID_CONTENT_TYPE: &str = "application/vnd.cypherback.secretsid";
const SET_CONTENT_TYPE: &str = "application/vnd.cypherback.backupset";
const CHUNK_CONTENT_TYPE: &str = "application/vnd.cypherback.chunk";

pub struct S3Backend {
    client: Client,
    endpoint: String,
    bucket: String,
    access_key: String,
    secret_key: String,
}

impl S3Backend {
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        let mut endpoint = endpoint.into();
        while endpoint.ends_with('/') {
            endpoint.pop();
        }
        Self {
            client: Client::new(),
            endpoint,
            bucket: bucket.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    fn sign(&self, verb: &str, content_type: &str, date: &str, key: &str) -> Result<String> {
        let string_to_sign =
            format!("{verb}\n\n{content_type}\n{date}\n/{}/{key}", self.bucket);
        let pkey = PKey::hmac(self.secret_key.as_bytes())?;
        let mut signer = Signer::new(MessageDigest::sha1(), &pkey)?;
        signer.update(string_to_sign.as_bytes())?;
        let mut mac = [0u8; 20];
        signer.sign(&mut mac)?;
        Ok(openssl::base64::encode_block(&mac))
    }

    fn request_error(context: &str, err: reqwest::Error) -> Error {
        Error::io(
            context,
            std::io::Error::new(std::io::ErrorKind::Other, err),
        )
    }

    fn status_error(context: &str, status: StatusCode) -> Error {
        Error::io(
            context,
            std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("unexpected status {status}"),
            ),
        )
    }

    fn put(&self, key: &str, content_type: &str, data: &[u8]) -> Result<()> {
        let date = httpdate();
        let signature = self.sign("PUT", content_type, &date, key)?;
        let url = format!("{}/{}/{key}", self.endpoint, self.bucket);

        let response = self
            .client
            .put(url.as_str())
            .header("Date", &date)
            .header("Content-Type", content_type)
            .header(
                "Authorization",
                format!("AWS {}:{signature}", self.access_key),
            )
            .body(data.to_vec())
            .send()
            .map_err(|err| Self::request_error(key, err))?;

        if !response.status().is_success() {
            return Err(Self::status_error(key, response.status()));
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let date = httpdate();
        let signature = self.sign("GET", "", &date, key)?;
        let url = format!("{}/{}/{key}", self.endpoint, self.bucket);

        let response = self
            .client
            .get(url.as_str())
            .header("Date", &date)
            .header(
                "Authorization",
                format!("AWS {}:{signature}", self.access_key),
            )
            .send()
            .map_err(|err| Self::request_error(key, err))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body = response
                    .bytes()
                    .map_err(|err| Self::request_error(key, err))?;
                Ok(Some(body.to_vec()))
            }
            status => Err(Self::status_error(key, status)),
        }
    }
}

fn httpdate() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

impl Backend for S3Backend {
    fn write_secrets(&self, keyring_id: &str, data: &[u8]) -> Result<()> {
        self.put(&format!("{keyring_id}/secrets"), SECRETS_CONTENT_TYPE, data)?;
        if self.get("defaultSecrets")?.is_none() {
            self.put(
                "defaultSecrets",
                SECRETS_ID_CONTENT_TYPE,
                keyring_id.as_bytes(),
            )?;
        }
        Ok(())
    }

    fn read_secrets(&self) -> Result<Vec<u8>> {
        let id = self.get("defaultSecrets")?.ok_or_else(|| {
            Error::io(
                "defaultSecrets",
                std::io::Error::new(std::io::ErrorKind::NotFound, "no default keyring"),
            )
        })?;
        let id = String::from_utf8(id).map_err(|_| {
            Error::CorruptKeyring("defaultSecrets pointer is not valid UTF-8".to_string())
        })?;
        let key = format!("{}/secrets", id.trim());
        self.get(&key)?.ok_or_else(|| {
            Error::io(
                &key,
                std::io::Error::new(std::io::ErrorKind::NotFound, "dangling default keyring"),
            )
        })
    }

    fn write_backup_set(&self, keyring_id: &str, set_id: &str, data: &[u8]) -> Result<()> {
        self.put(&format!("{keyring_id}/sets/{set_id}"), SET_CONTENT_TYPE, data)
    }

    fn read_backup_set(&self, keyring_id: &str, set_id: &str) -> Result<Option<Vec<u8>>> {
        self.get(&format!("{keyring_id}/sets/{set_id}"))
    }

    fn write_chunk(&self, keyring_id: &str, chunk_id: &str, data: &[u8]) -> Result<()> {
        self.put(
            &format!("{keyring_id}/chunks/{}", chunk_rel_path(chunk_id)),
            CHUNK_CONTENT_TYPE,
            data,
        )
    }

    fn read_chunk(&self, keyring_id: &str, chunk_id: &str) -> Result<Option<Vec<u8>>> {
        self.get(&format!("{keyring_id}/chunks/{}", chunk_rel_path(chunk_id)))
    }
}
