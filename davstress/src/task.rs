//! Operations that virtual users perform.
//!
//! A [`TaskOperation`] is one unit of simulated work, such as uploading a file. The built-in
//! [`UploadTask`] PUTs a file into the user's WebDAV folder and optionally deletes it again.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use rand::rngs::SmallRng;
use rand::{Rng, RngCore};

use crate::body::{BodySource, SizeDistribution};
use crate::error::TransportResult;
use crate::executor::{HttpOperation, Method, expect_success};
use crate::pool::VirtualUser;

/// The default location of a user's files on a WebDAV server.
pub const DEFAULT_PATH_TEMPLATE: &str = "/remote.php/dav/files/{user}/{file}";

/// Performs one unit of work on behalf of a virtual user.
#[async_trait]
pub trait TaskOperation: Send + Sync + fmt::Debug {
    /// Runs the operation as `user`, sending all requests through `executor`.
    ///
    /// `rng` belongs to the virtual user and may be used for any random decisions.
    async fn perform(
        &self,
        user: &VirtualUser,
        executor: &dyn HttpOperation,
        rng: &mut SmallRng,
    ) -> TransportResult<()>;
}

/// Where the contents of an uploaded file come from.
#[derive(Clone, Debug)]
pub enum UploadBody {
    /// A local file, streamed from disk on every upload.
    File(PathBuf),
    /// Generated contents with sizes drawn from a distribution.
    Generated(SizeDistribution),
}

/// Uploads a file to the user's folder, optionally deleting it afterwards.
#[derive(Clone, Debug)]
pub struct UploadTask {
    path_template: String,
    file_name: String,
    variants: Option<u32>,
    body: UploadBody,
    delete_after_upload: bool,
}

impl UploadTask {
    /// Creates a task that uploads `body` as `file_name` and deletes it afterwards.
    ///
    /// `file_name` may contain a `{n}` placeholder, see [`variants`](Self::variants).
    pub fn new(file_name: impl Into<String>, body: UploadBody) -> Self {
        Self {
            path_template: DEFAULT_PATH_TEMPLATE.to_owned(),
            file_name: file_name.into(),
            variants: None,
            body,
            delete_after_upload: true,
        }
    }

    /// Sets the template for remote paths.
    ///
    /// `{user}` is replaced with the username and `{file}` with the rendered file name.
    pub fn path_template(mut self, template: impl Into<String>) -> Self {
        self.path_template = template.into();
        self
    }

    /// Replaces `{n}` in the file name with a random number in `[0, variants)` on every upload.
    pub fn variants(mut self, variants: u32) -> Self {
        self.variants = Some(variants).filter(|v| *v > 0);
        self
    }

    /// Whether to delete the file again after a successful upload.
    pub fn delete_after_upload(mut self, delete: bool) -> Self {
        self.delete_after_upload = delete;
        self
    }

    fn render_path(&self, username: &str, rng: &mut SmallRng) -> String {
        let file = match self.variants {
            Some(variants) => {
                let n = rng.random_range(0..variants);
                self.file_name.replace("{n}", &n.to_string())
            }
            None => self.file_name.clone(),
        };

        self.path_template
            .replace("{user}", username)
            .replace("{file}", &file)
    }

    fn body_source(&self, rng: &mut SmallRng) -> BodySource {
        match &self.body {
            UploadBody::File(path) => BodySource::File(path.clone()),
            UploadBody::Generated(sizes) => BodySource::Generated(sizes.payload(rng.next_u64())),
        }
    }
}

#[async_trait]
impl TaskOperation for UploadTask {
    async fn perform(
        &self,
        user: &VirtualUser,
        executor: &dyn HttpOperation,
        rng: &mut SmallRng,
    ) -> TransportResult<()> {
        let path = self.render_path(user.username(), rng);
        let body = self.body_source(rng);
        let credential = user.credential();

        let status = executor.execute(Method::PUT, &path, body, credential).await?;
        expect_success(status)?;

        if self.delete_after_upload {
            let status = executor
                .execute(Method::DELETE, &path, BodySource::Empty, credential)
                .await?;
            expect_success(status)?;
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use rand::SeedableRng;
    use secrecy::SecretBox;

    use super::*;
    use crate::config::ConfigSecret;
    use crate::error::TransportError;
    use crate::executor::StatusCode;
    use crate::identity::{Credential, Identity};

    /// A task that does nothing and always succeeds.
    #[derive(Debug)]
    pub(crate) struct NoopTask;

    #[async_trait]
    impl TaskOperation for NoopTask {
        async fn perform(
            &self,
            _user: &VirtualUser,
            _executor: &dyn HttpOperation,
            _rng: &mut SmallRng,
        ) -> TransportResult<()> {
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct Recorder {
        requests: Mutex<Vec<(Method, String, Option<u64>)>>,
        status: Option<StatusCode>,
    }

    #[async_trait]
    impl HttpOperation for Recorder {
        async fn execute(
            &self,
            method: Method,
            path: &str,
            body: BodySource,
            _credential: &Credential,
        ) -> TransportResult<StatusCode> {
            let len = body.len_hint();
            self.requests
                .lock()
                .unwrap()
                .push((method, path.to_owned(), len));
            Ok(self.status.unwrap_or(StatusCode::CREATED))
        }
    }

    fn user() -> VirtualUser {
        let password = SecretBox::new(Box::new(ConfigSecret::from("secret")));
        VirtualUser::new(
            0,
            Identity {
                username: "locust_user7".into(),
                credential: Credential::new("locust_user7", password),
            },
        )
    }

    #[tokio::test]
    async fn uploads_and_deletes() {
        let task = UploadTask::new(
            "test_locust_file.txt",
            UploadBody::Generated(SizeDistribution::Fixed(1024)),
        );
        let recorder = Recorder::default();
        let mut rng = SmallRng::seed_from_u64(0);

        task.perform(&user(), &recorder, &mut rng).await.unwrap();

        let requests = recorder.requests.into_inner().unwrap();
        let path = "/remote.php/dav/files/locust_user7/test_locust_file.txt".to_owned();
        assert_eq!(
            requests,
            [
                (Method::PUT, path.clone(), Some(1024)),
                (Method::DELETE, path, Some(0)),
            ]
        );
    }

    #[tokio::test]
    async fn keeps_file_without_delete() {
        let task = UploadTask::new(
            "1gb_file_{n}",
            UploadBody::Generated(SizeDistribution::Fixed(1)),
        )
        .variants(10)
        .delete_after_upload(false);
        let recorder = Recorder::default();
        let mut rng = SmallRng::seed_from_u64(0);

        for _ in 0..20 {
            task.perform(&user(), &recorder, &mut rng).await.unwrap();
        }

        let requests = recorder.requests.into_inner().unwrap();
        assert_eq!(requests.len(), 20);
        for (method, path, _) in requests {
            assert_eq!(method, Method::PUT);
            let n: u32 = path
                .strip_prefix("/remote.php/dav/files/locust_user7/1gb_file_")
                .unwrap()
                .parse()
                .unwrap();
            assert!(n < 10);
        }
    }

    #[tokio::test]
    async fn failed_upload_skips_delete() {
        let task = UploadTask::new(
            "file",
            UploadBody::Generated(SizeDistribution::Fixed(1)),
        )
        .path_template("/dav/{user}/{file}");
        let recorder = Recorder {
            status: Some(StatusCode::INSUFFICIENT_STORAGE),
            ..Default::default()
        };
        let mut rng = SmallRng::seed_from_u64(0);

        let err = task.perform(&user(), &recorder, &mut rng).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Status(StatusCode::INSUFFICIENT_STORAGE)
        ));

        let requests = recorder.requests.into_inner().unwrap();
        assert_eq!(
            requests,
            [(Method::PUT, "/dav/locust_user7/file".to_owned(), Some(1))]
        );
    }
}
