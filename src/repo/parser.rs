//! src/repo/parser.rs
//! Discovers what each repository URL actually serves: a multi-arch snapshot
//! described by `builddata/build.xml`, or a plain rpm-md repository. Also
//! downloads the build configuration published alongside.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use flate2::read::GzDecoder;
use regex::Regex;
use tracing::debug;

use crate::arch;
use crate::errors::{GbsError, Result};
use crate::msger;
use crate::repo::auth;

pub trait Fetcher {
    /// Stores `url` at `dest`. Returns `Ok(false)` when the resource does
    /// not exist.
    fn fetch(&self, url: &str, dest: &Path) -> Result<bool>;
}

/// Fetches http(s) URLs with reqwest (credentials in the URL become basic
/// auth) and copies absolute local paths.
pub struct UrlFetcher {
    client: reqwest::blocking::Client,
}

impl UrlFetcher {
    pub fn new() -> Self {
        UrlFetcher { client: reqwest::blocking::Client::new() }
    }
}

impl Fetcher for UrlFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<bool> {
        if url.starts_with('/') {
            let src = Path::new(url);
            if !src.is_file() {
                return Ok(false);
            }
            fs::copy(src, dest)?;
            return Ok(true);
        }

        let fetch_err = |e: &dyn std::fmt::Display| GbsError::Fetch {
            url: auth::strip_credentials(url),
            reason: e.to_string(),
        };
        let mut response = self.client.get(url).send().map_err(|e| fetch_err(&e.without_url()))?;
        if !response.status().is_success() {
            debug!(url = %auth::strip_credentials(url), status = %response.status(), "not found");
            return Ok(false);
        }
        let mut file = File::create(dest)?;
        response.copy_to(&mut file).map_err(|e| fetch_err(&e.without_url()))?;
        Ok(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ArchRepo {
    arch: String,
    url: String,
}

#[derive(Debug)]
pub struct RepoParser {
    cachedir: PathBuf,
    standalone: Vec<String>,
    per_arch: Vec<ArchRepo>,
    buildconf: Option<PathBuf>,
    downloads: usize,
}

impl RepoParser {
    /// Inspects every URL in `repos`, storing downloads under `cachedir`.
    pub fn parse(repos: &[String], cachedir: &Path, fetcher: &dyn Fetcher) -> Result<Self> {
        let mut parser = RepoParser {
            cachedir: cachedir.to_path_buf(),
            standalone: Vec::new(),
            per_arch: Vec::new(),
            buildconf: None,
            downloads: 0,
        };
        for url in repos {
            parser.inspect(url, fetcher)?;
        }
        Ok(parser)
    }

    fn inspect(&mut self, url: &str, fetcher: &dyn Fetcher) -> Result<()> {
        let base = url.trim_end_matches('/');

        if let Some(build_xml) = self.download(&format!("{}/builddata/build.xml", base), fetcher)? {
            let content = fs::read_to_string(&build_xml)?;
            let archs = tag_values(&content, &ARCH_TAG);
            for repo in tag_values(&content, &REPO_TAG) {
                for a in &archs {
                    self.per_arch.push(ArchRepo {
                        arch: a.clone(),
                        url: format!("{}/repos/{}/{}/packages", base, repo, a),
                    });
                }
            }
            if let Some(name) = tag_values(&content, &BUILDCONF_TAG).into_iter().next() {
                self.fetch_buildconf(&format!("{}/builddata/{}", base, name), fetcher)?;
            }
            return Ok(());
        }

        if let Some(repomd) = self.download(&format!("{}/repodata/repomd.xml", base), fetcher)? {
            self.standalone.push(url.to_string());
            let content = fs::read_to_string(&repomd)?;
            if let Some(href) = build_location(&content) {
                self.fetch_buildconf(&format!("{}/{}", base, href), fetcher)?;
            }
            return Ok(());
        }

        msger::warning(format!("can't get valid repo from {}", auth::strip_credentials(url)));
        Ok(())
    }

    fn download(&mut self, url: &str, fetcher: &dyn Fetcher) -> Result<Option<PathBuf>> {
        let name = url.rsplit('/').next().unwrap_or("download");
        let dest = self.cachedir.join(format!("{}-{}", self.downloads, name));
        self.downloads += 1;
        debug!(url = %auth::strip_credentials(url), dest = %dest.display(), "fetching");
        Ok(fetcher.fetch(url, &dest)?.then_some(dest))
    }

    fn fetch_buildconf(&mut self, url: &str, fetcher: &dyn Fetcher) -> Result<()> {
        if self.buildconf.is_some() {
            return Ok(());
        }
        let Some(path) = self.download(url, fetcher)? else {
            return Ok(());
        };
        let conf = if url.ends_with(".gz") {
            let plain = path.with_extension("");
            let mut decoder = GzDecoder::new(File::open(&path)?);
            io::copy(&mut decoder, &mut File::create(&plain)?)?;
            plain
        } else {
            path
        };
        msger::info(format!("build conf has been downloaded at:\n      {}", conf.display()));
        self.buildconf = Some(conf);
        Ok(())
    }

    /// Repositories usable for `arch`: matching snapshot repos plus every
    /// plain repository.
    pub fn repos_by_arch(&self, target: &str) -> Vec<String> {
        let target = arch::canonicalize(target);
        self.per_arch
            .iter()
            .filter(|r| arch::canonicalize(&r.arch) == target)
            .map(|r| r.url.clone())
            .chain(self.standalone.iter().cloned())
            .collect()
    }

    pub fn buildconf(&self) -> Option<&Path> {
        self.buildconf.as_deref()
    }
}

fn tag_pattern(tag: &str) -> Regex {
    Regex::new(&format!(r"<{0}>\s*([^<]*?)\s*</{0}>", tag)).expect("tag pattern is valid")
}

static ARCH_TAG: LazyLock<Regex> = LazyLock::new(|| tag_pattern("arch"));
static REPO_TAG: LazyLock<Regex> = LazyLock::new(|| tag_pattern("repo"));
static BUILDCONF_TAG: LazyLock<Regex> = LazyLock::new(|| tag_pattern("buildconf"));
static BUILD_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<data\s+type="build"\s*>.*?<location\s+href="([^"]+)""#).expect("location pattern is valid")
});

fn tag_values(xml: &str, re: &Regex) -> Vec<String> {
    re.captures_iter(xml)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn build_location(repomd: &str) -> Option<String> {
    BUILD_LOCATION.captures(repomd).and_then(|c| c.get(1)).map(|m| m.as_str().to_string())
}


#[cfg(test)]
mod tests {
    use super::testing::FakeFetcher;
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const BUILD_XML: &str = r#"<build version="1.0">
  <archs>
    <arch>ia32</arch>
    <arch>armv7l</arch>
  </archs>
  <repos>
    <repo>base</repo>
    <repo>main</repo>
  </repos>
  <buildconf>snap-build.conf</buildconf>
</build>"#;

    #[test]
    fn snapshot_repos_expand_per_arch() {
        let cache = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::default()
            .with("http://s/snap/builddata/build.xml", BUILD_XML.as_bytes())
            .with("http://s/snap/builddata/snap-build.conf", b"%define snap 1\n");

        let parser = RepoParser::parse(&["http://s/snap/".to_string()], cache.path(), &fetcher).unwrap();
        assert_eq!(
            parser.repos_by_arch("i686"),
            vec!["http://s/snap/repos/base/ia32/packages", "http://s/snap/repos/main/ia32/packages"]
        );
        assert_eq!(parser.repos_by_arch("armv7l").len(), 2);
        assert!(parser.repos_by_arch("armv7hl").is_empty());

        let conf = parser.buildconf().unwrap();
        assert_eq!(fs::read_to_string(conf).unwrap(), "%define snap 1\n");
    }

    #[test]
    fn plain_repo_serves_every_arch_and_gunzips_buildconf() {
        let cache = tempfile::tempdir().unwrap();
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(b"Macros:\n").unwrap();
        let repomd = r#"<repomd>
  <data type="primary"><location href="repodata/primary.xml.gz"/></data>
  <data type="build">
    <checksum type="sha256">abc</checksum>
    <location href="repodata/abc-build.conf.gz"/>
  </data>
</repomd>"#;
        let fetcher = FakeFetcher::default()
            .with("http://r/repo/repodata/repomd.xml", repomd.as_bytes())
            .with("http://r/repo/repodata/abc-build.conf.gz", &gz.finish().unwrap());

        let parser = RepoParser::parse(&["http://r/repo".to_string()], cache.path(), &fetcher).unwrap();
        assert_eq!(parser.repos_by_arch("armv7l"), vec!["http://r/repo"]);
        assert_eq!(parser.repos_by_arch("i586"), vec!["http://r/repo"]);

        let conf = parser.buildconf().unwrap();
        assert!(!conf.to_string_lossy().ends_with(".gz"));
        assert_eq!(fs::read_to_string(conf).unwrap(), "Macros:\n");
    }

    #[test]
    fn unknown_urls_are_skipped() {
        let cache = tempfile::tempdir().unwrap();
        let fetcher = FakeFetcher::default();
        let parser = RepoParser::parse(&["http://u:p@nowhere/x".to_string()], cache.path(), &fetcher).unwrap();
        assert!(parser.repos_by_arch("i586").is_empty());
        assert!(parser.buildconf().is_none());
        assert_eq!(
            *fetcher.requested.borrow(),
            vec!["http://u:p@nowhere/x/builddata/build.xml", "http://u:p@nowhere/x/repodata/repomd.xml"]
        );
    }

    #[test]
    fn first_buildconf_wins() {
        let cache = tempfile::tempdir().unwrap();
        let repomd = r#"<data type="build"><location href="repodata/b.conf"/></data>"#;
        let fetcher = FakeFetcher::default()
            .with("http://a/repodata/repomd.xml", repomd.as_bytes())
            .with("http://a/repodata/b.conf", b"first")
            .with("http://b/repodata/repomd.xml", repomd.as_bytes())
            .with("http://b/repodata/b.conf", b"second");
        let repos = vec!["http://a".to_string(), "http://b".to_string()];
        let parser = RepoParser::parse(&repos, cache.path(), &fetcher).unwrap();
        assert_eq!(fs::read_to_string(parser.buildconf().unwrap()).unwrap(), "first");
        assert_eq!(parser.repos_by_arch("i586"), repos);
    }

    #[test]
    fn tags_are_trimmed_and_empty_ones_dropped() {
        let xml = "<arch> ia32 </arch><arch></arch><repo>base</repo>";
        assert_eq!(tag_values(xml, &ARCH_TAG), vec!["ia32"]);
        assert_eq!(tag_values(xml, &REPO_TAG), vec!["base"]);
        assert!(tag_values(xml, &BUILDCONF_TAG).is_empty());
        assert_eq!(build_location("<repomd/>"), None);
    }

    #[test]
    fn local_fetcher_copies_files() {
        let src = tempfile::tempdir().unwrap();
        let file = src.path().join("repomd.xml");
        fs::write(&file, "<repomd/>").unwrap();
        let dest = src.path().join("copy.xml");

        let fetcher = UrlFetcher::new();
        assert!(fetcher.fetch(file.to_str().unwrap(), &dest).unwrap());
        assert_eq!(fs::read_to_string(&dest).unwrap(), "<repomd/>");
        assert!(!fetcher.fetch("/no/such/file.xml", &dest).unwrap());
    }
}
