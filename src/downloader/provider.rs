//! Per-host transfer rules
//!
//! Each model host has its own conventions for authentication and file
//! naming. A [`Provider`] turns a job into a [`TransferPlan`]: the program to
//! run, its arguments, and where the file lands.
//!
//! - CivitAI wants its token as a `token` query parameter and names files via
//!   `Content-Disposition`.
//! - HuggingFace wants a bearer header, and its URLs end in a stable
//!   `file.ext` that we can name the output after.
//! - Google Drive links go to a dedicated helper script instead of aria2c.
//! - Everything else is fetched as-is and named by the server.

use std::{path::PathBuf, sync::Arc};
use tracing::debug;
use url::Url;

use super::models::{FilenamePolicy, Job, TargetApp};
use crate::credentials::Credentials;

/// Filename stems that many repositories share. Outputs with these stems get
/// the job id appended so two different models do not overwrite each other.
const SHARED_WEIGHT_STEMS: &[&str] = &["diffusion_pytorch_model", "pytorch_model"];

/// Static settings every plan is built from
#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub resource_path: PathBuf,
    pub target: TargetApp,
    pub aria2c_bin: String,
    pub python_bin: String,
    pub gdrive_helper: String,
    pub connections: u16,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            resource_path: PathBuf::from("./my-runpod-volume/models"),
            target: TargetApp::default(),
            aria2c_bin: "aria2c".to_string(),
            python_bin: "python3".to_string(),
            gdrive_helper: "./scripts/google_drive_download.py".to_string(),
            connections: 8,
        }
    }
}

/// A fully resolved invocation of the transfer program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    pub provider: &'static str,
    pub program: String,
    pub args: Vec<String>,
    pub destination: PathBuf,
    pub filename: Option<String>,
}

/// Everything a provider needs to know about the job it plans for
pub struct PlanContext<'a> {
    pub job: &'a Job,
    pub url: Option<&'a Url>,
    pub policy: FilenamePolicy,
    pub destination: PathBuf,
    pub settings: &'a TransferSettings,
    pub credentials: &'a Credentials,
}

pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this provider handles URLs on `host`
    fn matches(&self, host: &str) -> bool;

    fn plan(&self, ctx: &PlanContext<'_>) -> TransferPlan;
}

fn host_is(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// Arguments shared by every aria2c invocation
fn aria2c_plan(
    provider: &'static str,
    ctx: &PlanContext<'_>,
    url: String,
    auth_header: Option<String>,
    filename: Option<String>,
) -> TransferPlan {
    let connections = ctx.settings.connections.max(1).to_string();
    let mut args = vec![
        "--console-log-level=error".to_string(),
        "-c".to_string(),
        "-x".to_string(),
        connections.clone(),
        "-s".to_string(),
        connections,
        "-k".to_string(),
        "1M".to_string(),
        "--retry-wait=5".to_string(),
        "--max-tries=3".to_string(),
        url,
        format!("--dir={}", ctx.destination.display()),
        "--download-result=hide".to_string(),
    ];

    if let Some(header) = auth_header {
        args.push(format!("--header={header}"));
    }

    match &filename {
        Some(name) => {
            args.push("-o".to_string());
            args.push(name.clone());
        }
        None => args.push("--content-disposition=true".to_string()),
    }

    TransferPlan {
        provider,
        program: ctx.settings.aria2c_bin.clone(),
        args,
        destination: ctx.destination.clone(),
        filename,
    }
}

/// Last path segment of `url`, percent-decoded
fn url_filename(url: &str) -> Option<String> {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url
            .split(|c: char| c == '?' || c == '#')
            .next()
            .unwrap_or_default()
            .to_string(),
    };
    let segment = path.rsplit('/').find(|s| !s.is_empty())?;
    let decoded = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    Some(decoded)
}

fn split_extension(filename: &str) -> Option<(&str, &str)> {
    let (stem, ext) = filename.rsplit_once('.')?;
    let valid_ext = !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric());
    (!stem.is_empty() && valid_ext).then_some((stem, ext))
}

fn sanitize(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect()
}

/// Output filename for a job whose URL ends in a stable `file.ext`.
///
/// Rules, in order:
/// - `RemoteSuggested` never forces a name.
/// - No extension in the URL's last segment means no forced name.
/// - With the category placeholder as display name, the URL's filename is
///   used; a shared weight stem gets `-<job id>` appended.
/// - A custom display name is used verbatim if it already ends in the
///   extension, otherwise the extension is appended.
pub fn derive_filename(job: &Job, policy: FilenamePolicy) -> Option<String> {
    if policy == FilenamePolicy::RemoteSuggested {
        return None;
    }

    let segment = url_filename(&job.url)?;
    let (stem, ext) = split_extension(&segment)?;

    if job.has_placeholder_name() {
        let shared = SHARED_WEIGHT_STEMS.iter().any(|marker| stem.contains(marker));
        return Some(if shared {
            format!("{}-{}.{}", sanitize(stem), job.id, ext)
        } else {
            sanitize(&segment)
        });
    }

    let name = sanitize(&job.name);
    let suffix = format!(".{}", ext.to_ascii_lowercase());
    if name.to_ascii_lowercase().ends_with(&suffix) {
        Some(name)
    } else {
        Some(format!("{name}.{ext}"))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Civitai;

impl Provider for Civitai {
    fn name(&self) -> &'static str {
        "civitai"
    }

    fn matches(&self, host: &str) -> bool {
        host_is(host, "civitai.com")
    }

    fn plan(&self, ctx: &PlanContext<'_>) -> TransferPlan {
        let url = match (ctx.url, ctx.credentials.civitai()) {
            (Some(parsed), Some(token)) => {
                let mut authed = parsed.clone();
                authed.query_pairs_mut().append_pair("token", &token);
                authed.to_string()
            }
            _ => ctx.job.url.clone(),
        };
        // Download endpoints look like /api/download/models/<id>, the real name
        // only arrives in Content-Disposition.
        aria2c_plan(self.name(), ctx, url, None, None)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HuggingFace;

impl Provider for HuggingFace {
    fn name(&self) -> &'static str {
        "huggingface"
    }

    fn matches(&self, host: &str) -> bool {
        host_is(host, "huggingface.co") || host_is(host, "hf.co")
    }

    fn plan(&self, ctx: &PlanContext<'_>) -> TransferPlan {
        let header = ctx
            .credentials
            .huggingface()
            .map(|token| format!("Authorization: Bearer {token}"));
        let filename = derive_filename(ctx.job, ctx.policy);
        aria2c_plan(self.name(), ctx, ctx.job.url.clone(), header, filename)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GoogleDrive;

impl Provider for GoogleDrive {
    fn name(&self) -> &'static str {
        "google-drive"
    }

    fn matches(&self, host: &str) -> bool {
        host_is(host, "drive.google.com")
    }

    fn plan(&self, ctx: &PlanContext<'_>) -> TransferPlan {
        TransferPlan {
            provider: self.name(),
            program: ctx.settings.python_bin.clone(),
            args: vec![
                ctx.settings.gdrive_helper.clone(),
                "--path".to_string(),
                ctx.destination.display().to_string(),
                "--url".to_string(),
                ctx.job.url.clone(),
            ],
            destination: ctx.destination.clone(),
            filename: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GenericHttp;

impl Provider for GenericHttp {
    fn name(&self) -> &'static str {
        "http"
    }

    fn matches(&self, _host: &str) -> bool {
        true
    }

    /// Generic URLs have no stable `file.ext`; the server names the file.
    fn plan(&self, ctx: &PlanContext<'_>) -> TransferPlan {
        aria2c_plan(self.name(), ctx, ctx.job.url.clone(), None, None)
    }
}

static PROVIDERS: &[&dyn Provider] = &[&GoogleDrive, &Civitai, &HuggingFace];

/// Pick the provider responsible for `url`, falling back to plain HTTP.
pub fn provider_for(url: Option<&Url>) -> &'static dyn Provider {
    url.and_then(|u| u.host_str())
        .and_then(|host| PROVIDERS.iter().copied().find(|p| p.matches(host)))
        .unwrap_or(&GenericHttp)
}

/// Builds transfer plans from the shared settings and the live credentials
#[derive(Debug, Clone)]
pub struct Planner {
    settings: TransferSettings,
    credentials: Arc<Credentials>,
}

impl Planner {
    pub fn new(settings: TransferSettings, credentials: Arc<Credentials>) -> Self {
        Self {
            settings,
            credentials,
        }
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    pub fn plan(&self, job: &Job, policy: FilenamePolicy) -> TransferPlan {
        let url = Url::parse(&job.url).ok();
        let provider = provider_for(url.as_ref());
        let destination = self
            .settings
            .resource_path
            .join(job.category.directory_for(self.settings.target));

        let ctx = PlanContext {
            job,
            url: url.as_ref(),
            policy,
            destination,
            settings: &self.settings,
            credentials: &self.credentials,
        };
        let plan = provider.plan(&ctx);
        debug!(
            id = %job.id,
            provider = plan.provider,
            destination = ?plan.destination,
            filename = ?plan.filename,
            "Built transfer plan"
        );
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::TokenKind;
    use crate::downloader::models::Category;

    fn planner(target: TargetApp, creds: Credentials) -> Planner {
        Planner::new(
            TransferSettings {
                resource_path: PathBuf::from("/models"),
                target,
                ..Default::default()
            },
            Arc::new(creds),
        )
    }

    fn job(url: &str, name: Option<&str>, category: Category) -> Job {
        Job::new(url, name.map(str::to_string), category)
    }

    fn arg_after<'a>(plan: &'a TransferPlan, flag: &str) -> Option<&'a str> {
        plan.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| plan.args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_provider_selection_by_host() {
        let pick = |s: &str| provider_for(Url::parse(s).ok().as_ref()).name();
        assert_eq!(pick("https://civitai.com/api/download/models/1"), "civitai");
        assert_eq!(pick("https://www.civitai.com/api/download/models/1"), "civitai");
        assert_eq!(pick("https://huggingface.co/x/y/resolve/main/a.safetensors"), "huggingface");
        assert_eq!(pick("https://drive.google.com/file/d/abc/view"), "google-drive");
        assert_eq!(pick("https://notcivitai.com/file.pt"), "http");
        assert_eq!(pick("not a url"), "http");
    }

    #[test]
    fn test_huggingface_plain_filename() {
        let p = planner(TargetApp::Comfy, Credentials::default());
        let j = job("https://huggingface.co/x/model.safetensors", None, Category::Checkpoints);
        let plan = p.plan(&j, FilenamePolicy::Derive);

        assert_eq!(plan.provider, "huggingface");
        assert_eq!(plan.program, "aria2c");
        assert_eq!(plan.filename.as_deref(), Some("model.safetensors"));
        assert_eq!(arg_after(&plan, "-o"), Some("model.safetensors"));
        assert_eq!(plan.destination, PathBuf::from("/models/checkpoints"));
        assert!(plan.args.contains(&"--dir=/models/checkpoints".to_string()));
        assert!(plan.args.contains(&"https://huggingface.co/x/model.safetensors".to_string()));
        assert!(!plan.args.iter().any(|a| a.starts_with("--header")));
    }

    #[test]
    fn test_huggingface_token_goes_in_header_not_url() {
        let creds = Credentials::new(None, Some("hf_secret".into()));
        let p = planner(TargetApp::Comfy, creds);
        let j = job("https://huggingface.co/x/model.safetensors", None, Category::Vae);
        let plan = p.plan(&j, FilenamePolicy::Derive);

        assert!(plan
            .args
            .contains(&"--header=Authorization: Bearer hf_secret".to_string()));
        assert!(plan
            .args
            .iter()
            .filter(|a| a.starts_with("https://"))
            .all(|a| !a.contains("hf_secret")));
    }

    #[test]
    fn test_civitai_token_appended_as_query() {
        let creds = Credentials::default();
        creds.set(TokenKind::Civitai, "abc");
        let p = planner(TargetApp::Comfy, creds);

        let plain = job("https://civitai.com/api/download/models/42", None, Category::Loras);
        let plan = p.plan(&plain, FilenamePolicy::Derive);
        assert!(plan
            .args
            .contains(&"https://civitai.com/api/download/models/42?token=abc".to_string()));
        assert!(plan.args.contains(&"--content-disposition=true".to_string()));
        assert_eq!(plan.filename, None);

        let with_query = job(
            "https://civitai.com/api/download/models/42?type=Model&format=SafeTensor",
            None,
            Category::Loras,
        );
        let plan = p.plan(&with_query, FilenamePolicy::Derive);
        assert!(plan.args.contains(
            &"https://civitai.com/api/download/models/42?type=Model&format=SafeTensor&token=abc"
                .to_string()
        ));
    }

    #[test]
    fn test_civitai_without_token_is_untouched() {
        let p = planner(TargetApp::Comfy, Credentials::default());
        let j = job("https://civitai.com/api/download/models/42", None, Category::Loras);
        let plan = p.plan(&j, FilenamePolicy::Derive);
        assert!(plan
            .args
            .contains(&"https://civitai.com/api/download/models/42".to_string()));
    }

    #[test]
    fn test_google_drive_uses_helper() {
        let p = planner(TargetApp::Forge, Credentials::new(Some("a".into()), Some("b".into())));
        let j = job("https://drive.google.com/file/d/abc/view", Some("thing"), Category::Checkpoints);
        let plan = p.plan(&j, FilenamePolicy::Derive);

        assert_eq!(plan.program, "python3");
        assert_eq!(
            plan.args,
            vec![
                "./scripts/google_drive_download.py".to_string(),
                "--path".to_string(),
                "/models/ckpts".to_string(),
                "--url".to_string(),
                "https://drive.google.com/file/d/abc/view".to_string(),
            ]
        );
        assert_eq!(plan.filename, None);
    }

    #[test]
    fn test_generic_host_uses_remote_filename() {
        let p = planner(TargetApp::Comfy, Credentials::default());
        for url in [
            "https://example.com/get.php?id=1",
            "https://example.com/models/a.safetensors",
        ] {
            let j = job(url, Some("my model"), Category::Loras);
            let plan = p.plan(&j, FilenamePolicy::Derive);

            assert_eq!(plan.provider, "http");
            assert_eq!(plan.filename, None);
            assert_eq!(arg_after(&plan, "-o"), None);
            assert!(plan.args.contains(&"--content-disposition=true".to_string()));
        }
    }

    #[test]
    fn test_forge_destination_alias() {
        let p = planner(TargetApp::Forge, Credentials::default());
        let j = job("https://example.com/clip_l.safetensors", None, Category::Clip);
        assert_eq!(
            p.plan(&j, FilenamePolicy::Derive).destination,
            PathBuf::from("/models/text-encoder")
        );
    }

    #[test]
    fn test_custom_name_gets_extension() {
        let j = job("https://example.com/dl/abc.safetensors", Some("my model"), Category::Loras);
        assert_eq!(
            derive_filename(&j, FilenamePolicy::Derive).as_deref(),
            Some("my model.safetensors")
        );

        let j = job("https://example.com/dl/abc.safetensors", Some("mine.SafeTensors"), Category::Loras);
        assert_eq!(
            derive_filename(&j, FilenamePolicy::Derive).as_deref(),
            Some("mine.SafeTensors")
        );

        let j = job("https://example.com/dl/abc.safetensors", Some("a/b"), Category::Loras);
        assert_eq!(
            derive_filename(&j, FilenamePolicy::Derive).as_deref(),
            Some("a_b.safetensors")
        );
    }

    #[test]
    fn test_shared_weight_stem_gets_job_id() {
        let j = job(
            "https://huggingface.co/org/repo/resolve/main/unet/diffusion_pytorch_model.safetensors",
            None,
            Category::Unet,
        );
        assert_eq!(
            derive_filename(&j, FilenamePolicy::Derive),
            Some(format!("diffusion_pytorch_model-{}.safetensors", j.id))
        );

        // A custom name is already distinct and wins over the suffix rule
        let j = job(
            "https://huggingface.co/org/repo/resolve/main/unet/diffusion_pytorch_model.safetensors",
            Some("sdxl-unet"),
            Category::Unet,
        );
        assert_eq!(
            derive_filename(&j, FilenamePolicy::Derive).as_deref(),
            Some("sdxl-unet.safetensors")
        );
    }

    #[test]
    fn test_no_forced_name_without_extension_or_for_packs() {
        let j = job("https://example.com/download/12345", Some("thing"), Category::Loras);
        assert_eq!(derive_filename(&j, FilenamePolicy::Derive), None);

        let j = job("https://huggingface.co/x/model.safetensors", Some("named"), Category::Vae);
        assert_eq!(derive_filename(&j, FilenamePolicy::RemoteSuggested), None);

        let p = planner(TargetApp::Comfy, Credentials::default());
        let plan = p.plan(&j, FilenamePolicy::RemoteSuggested);
        assert!(plan.args.contains(&"--content-disposition=true".to_string()));
        assert_eq!(arg_after(&plan, "-o"), None);
    }

    #[test]
    fn test_percent_encoded_filename_is_decoded() {
        let j = job("https://example.com/a/My%20Model.ckpt?download=1", None, Category::Checkpoints);
        assert_eq!(
            derive_filename(&j, FilenamePolicy::Derive).as_deref(),
            Some("My Model.ckpt")
        );
    }
}
