//! File storage sub-interface: object upload and public URLs.

use super::{BackendClient, BackendError};

/// Client for the backend's `storage/v1` object store.
pub struct StorageClient<'a> {
    client: &'a BackendClient,
}

impl<'a> StorageClient<'a> {
    pub(crate) fn new(client: &'a BackendClient) -> Self {
        Self { client }
    }

    /// Upload an object and return its public URL.
    ///
    /// The content type is guessed from the object path; callers that need
    /// an exact type should encode it in the file extension.
    pub async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        bearer: Option<&str>,
    ) -> Result<String, BackendError> {
        let url = self
            .client
            .endpoint(&format!("storage/v1/object/{bucket}/{path}"))?;

        let content_type = mime_guess::from_path(path)
            .first_or(mime::APPLICATION_OCTET_STREAM)
            .to_string();

        let token = bearer.unwrap_or(self.client.api_key());
        let response = self
            .client
            .http()
            .post(url)
            .header("apikey", self.client.api_key())
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;
        BackendClient::check(response).await?;

        self.public_url(bucket, path)
    }

    /// Public download URL for an object.
    pub fn public_url(&self, bucket: &str, path: &str) -> Result<String, BackendError> {
        Ok(self
            .client
            .endpoint(&format!("storage/v1/object/public/{bucket}/{path}"))?
            .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_public_url() {
        let client =
            BackendClient::from_config(&Config::test_config("http://127.0.0.1:9000")).unwrap();
        let url = client
            .storage()
            .public_url("materials", "algebra/worksheet-1.pdf")
            .unwrap();
        assert_eq!(
            url,
            "http://127.0.0.1:9000/storage/v1/object/public/materials/algebra/worksheet-1.pdf"
        );
    }
}
