//! Mascot identification search, submitted to a Mascot server's CGI interface
//! and awaited synchronously.

use crate::context::PipelineContext;
use crate::prefs::{MASCOT_DB, MASCOT_PREFS};
use crate::stage::{ActResult, QueueStage};
use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use ms_store::DurableQueue;
use ms_types::{SampleIdentity, SampleStatus, SearchEngine};
use regex::Regex;
use reqwest::blocking::{multipart, Client};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Text of the page Mascot answers with when it refuses a search.
pub const SEARCH_REJECTED: &str = "Sorry, your search could not be performed";

const FORM_VERSION: &str = "1.01";

/// Read a Mascot parameter file of `NAME=value` lines. Blank lines and lines
/// starting with `#` are skipped.
pub fn read_params(path: &Path) -> Result<BTreeMap<String, String>> {
    let text = std::fs::read_to_string(path).with_context(|| path.display().to_string())?;
    let mut params = BTreeMap::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((name, value)) = line.split_once('=') else {
            bail!("{}:{}: expected NAME=value, got '{line}'", path.display(), i + 1);
        };
        params.insert(name.trim().to_string(), value.trim().to_string());
    }
    Ok(params)
}

/// Where Mascot stored a finished search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultFile {
    pub date: String,
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchResponse {
    Accepted(ResultFile),
    Rejected,
    /// Neither a result link nor the rejection text.
    Unrecognized,
}

pub fn parse_search_response(body: &str) -> Result<SearchResponse> {
    if body.contains(SEARCH_REJECTED) {
        return Ok(SearchResponse::Rejected);
    }
    let link = Regex::new(r"master_results_2\.pl\?file=.*data/(?P<date>[0-9]+)/(?P<file>F[0-9]+\.dat)")?;
    Ok(match link.captures(body) {
        Some(caps) => SearchResponse::Accepted(ResultFile {
            date: caps["date"].to_string(),
            file: caps["file"].to_string(),
        }),
        None => SearchResponse::Unrecognized,
    })
}

/// Download URL of a result file. Results are served from the `x-cgi` tree
/// next to `cgi`.
pub fn result_url(cgi: &str, result: &ResultFile) -> Result<String> {
    let base = cgi.trim_end_matches('/');
    let parent = base
        .strip_suffix("cgi")
        .ok_or_else(|| anyhow!("Mascot CGI url '{cgi}' does not end in /cgi"))?;
    Ok(format!(
        "{parent}x-cgi/ms-status.exe?Autorefresh=false&Show=RESULTFILE&DateDir={}&ResJob={}",
        result.date, result.file
    ))
}

/// A logged-in session with the Mascot server.
pub struct MascotClient {
    client: Client,
    cgi: String,
}

impl MascotClient {
    pub fn new(cgi: &str, timeout: Option<Duration>) -> Result<MascotClient> {
        let client = Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()?;
        Ok(MascotClient {
            client,
            cgi: cgi.trim_end_matches('/').to_string(),
        })
    }

    pub fn login(&self, user: &str, password: &str) -> Result<()> {
        let url = format!("{}/login.pl", self.cgi);
        self.client
            .post(&url)
            .form(&[
                ("username", user),
                ("password", password),
                ("action", "login"),
                ("savecookie", "1"),
            ])
            .send()
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("logging in to {url}"))?;
        Ok(())
    }

    /// Post the peak list with the search parameters and return the response page.
    pub fn submit(&self, mgf: &Path, params: &BTreeMap<String, String>) -> Result<String> {
        let url = format!("{}/nph-mascot.exe?1", self.cgi);
        let form = params
            .iter()
            .fold(multipart::Form::new(), |form, (name, value)| {
                form.text(name.clone(), value.clone())
            })
            .file("FILE", mgf)
            .with_context(|| mgf.display().to_string())?;
        let body = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.text())
            .with_context(|| format!("submitting search to {url}"))?;
        Ok(body)
    }

    /// Download `url` to `dest`, which appears only once complete.
    pub fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let dir = dest
            .parent()
            .ok_or_else(|| anyhow!("{} has no parent directory", dest.display()))?;
        let mut tmp = NamedTempFile::new_in(dir).with_context(|| dir.display().to_string())?;
        let mut response = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("downloading {url}"))?;
        response
            .copy_to(tmp.as_file_mut())
            .with_context(|| format!("downloading {url}"))?;
        tmp.persist(dest)
            .map_err(|e| e.error)
            .with_context(|| dest.display().to_string())?;
        Ok(())
    }
}

fn is_timeout(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|e| e.downcast_ref::<reqwest::Error>().is_some_and(reqwest::Error::is_timeout))
}

pub struct MascotStage;

impl MascotStage {
    fn search(&self, id: &SampleIdentity, ctx: &PipelineContext) -> Result<ActResult> {
        let settings = &ctx.config.mascot;
        let prefs = ctx.prefs()?;
        let mut params = read_params(&prefs.prefs_file(ctx.protocol(id), MASCOT_PREFS)?)?;
        params.insert(
            "DB".to_string(),
            prefs.database(ctx.organism(id), MASCOT_DB)?.to_string(),
        );
        params.insert(
            "COM".to_string(),
            format!(
                "{}: {}",
                settings.comment_prefix,
                ctx.complete(id.clone()).fields(ctx.profile()).join("/")
            ),
        );
        params.insert("FORMVER".to_string(), FORM_VERSION.to_string());

        let log = ctx.project_log(&id.project);
        let client = MascotClient::new(&settings.cgi_url, settings.timeout())?;
        client.login(&settings.user, &settings.password()?)?;
        log.record(format!("Logged in {}", settings.cgi_url));

        let body = client.submit(&ctx.layout.mgf(id), &params)?;
        debug!("Mascot response for {id}: {body}");
        let result = match parse_search_response(&body)? {
            SearchResponse::Accepted(result) => result,
            SearchResponse::Rejected => {
                log.record("Mascot search failed");
                return Ok(ActResult::Failed("search rejected by Mascot".to_string()));
            }
            SearchResponse::Unrecognized => {
                log.record(format!("Unexpected Mascot response: {body}"));
                return Ok(ActResult::Failed(
                    "no result file in the Mascot response".to_string(),
                ));
            }
        };

        let url = result_url(&settings.cgi_url, &result)?;
        log.record(format!("Downloading file {url}"));
        let output = ctx.layout.search_output(SearchEngine::Mascot, id);
        client.download(&url, &output)?;
        log.record("Downloaded");
        Ok(ActResult::Completed)
    }
}

impl QueueStage for MascotStage {
    fn name(&self) -> &'static str {
        "mascot"
    }

    fn input(&self, ctx: &PipelineContext) -> DurableQueue {
        ctx.search_queue(SearchEngine::Mascot)
    }

    fn outputs(&self, _ctx: &PipelineContext) -> Vec<DurableQueue> {
        Vec::new()
    }

    fn running_status(&self, _id: &SampleIdentity) -> SampleStatus {
        SampleStatus::SearchRunning(SearchEngine::Mascot)
    }

    fn finished_status(&self, id: &SampleIdentity, ctx: &PipelineContext) -> SampleStatus {
        SampleStatus::SearchFinished(ctx.layout.finished_searches(id))
    }

    fn act(&self, id: &SampleIdentity, ctx: &PipelineContext) -> Result<ActResult> {
        match self.search(id, ctx) {
            Err(err) if is_timeout(&err) => Ok(ActResult::TimedOut),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::run_queue_stage;
    use crate::testing::TestPipeline;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_read_params() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("search.par");
        std::fs::write(
            &path,
            "# defaults\nCLE = Trypsin/P\n\nMODS=Carbamidomethyl (C)\nIT_MODS=Oxidation (M)\nUSERNAME=\n",
        )?;
        let params = read_params(&path)?;
        assert_eq!(params["CLE"], "Trypsin/P");
        assert_eq!(params["MODS"], "Carbamidomethyl (C)");
        assert_eq!(params["USERNAME"], "");
        assert_eq!(params.len(), 4);

        std::fs::write(&path, "CLE Trypsin\n")?;
        assert!(read_params(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_parse_search_response() -> Result<()> {
        let accepted = "<A HREF=\"../cgi/master_results_2.pl?file=../data/20210420/F052415.dat\">Click here</A>";
        assert_eq!(
            parse_search_response(accepted)?,
            SearchResponse::Accepted(ResultFile {
                date: "20210420".to_string(),
                file: "F052415.dat".to_string()
            })
        );
        assert_eq!(
            parse_search_response("Sorry, your search could not be performed\nNo spectra")?,
            SearchResponse::Rejected
        );
        assert_eq!(
            parse_search_response("<html>busy</html>")?,
            SearchResponse::Unrecognized
        );
        Ok(())
    }

    #[test]
    fn test_result_url() -> Result<()> {
        let result = ResultFile {
            date: "20210420".to_string(),
            file: "F052415.dat".to_string(),
        };
        assert_eq!(
            result_url("http://mascot.local/mascot/cgi/", &result)?,
            "http://mascot.local/mascot/x-cgi/ms-status.exe?Autorefresh=false&Show=RESULTFILE\
             &DateDir=20210420&ResJob=F052415.dat"
        );
        assert!(result_url("http://mascot.local/mascot", &result).is_err());
        Ok(())
    }

    #[test]
    fn test_unreachable_server_fails_the_sample() -> Result<()> {
        let pipeline = TestPipeline::new()?;
        pipeline.seed_prefs()?;
        pipeline.set_list(&[["P1", "S1", "TRUE", "", ""]]);
        let ctx = pipeline.context();
        let id = pipeline.identity("P1", "S1");
        pipeline.touch(&ctx.layout.mgf(&id))?;
        ctx.search_queue(SearchEngine::Mascot).enqueue(&[id])?;

        assert!(run_queue_stage(&MascotStage, &ctx)?.is_failure());
        assert!(pipeline
            .status("P1", "S1")?
            .starts_with("Failed (mascot): logging in to http://127.0.0.1:9/mascot/cgi/login.pl"));
        Ok(())
    }
}
