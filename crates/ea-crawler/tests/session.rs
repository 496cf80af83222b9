use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ea_crawler::sws_scraper::Selector;
use ea_crawler::{
    crawl_with, join_url, Args, Bindings, CrawlerConfig, Downloadable, Error, HttpBackend, Json,
    Memoized, Method, OnError, Request, Session, Signature, Site, ThrottleConfig, TransportError,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Default)]
struct FakeSite {
    pages: HashMap<String, Vec<u8>>,
    requests: Mutex<Vec<Request>>,
}

impl FakeSite {
    fn page(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.pages.insert(url.to_string(), body.into());
        self
    }

    fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn count_for(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url == url)
            .count()
    }

    fn last(&self) -> Request {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

impl HttpBackend for FakeSite {
    fn execute(&self, request: &Request) -> Result<Vec<u8>, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        match request.method {
            Method::Post => Ok(format!("posted {:?}", request.form).into_bytes()),
            Method::Get => self
                .pages
                .get(&request.url)
                .cloned()
                .ok_or_else(|| TransportError::Status {
                    url: request.url.clone(),
                    status: 404,
                }),
        }
    }
}

fn quick_config() -> CrawlerConfig {
    CrawlerConfig {
        throttle: ThrottleConfig::none(),
        ..Default::default()
    }
}

fn open(root: &Path, site: &Arc<FakeSite>) -> Session {
    Session::with_backend(root, &quick_config(), site.clone()).unwrap()
}

const DISTRICTS: &str = "http://www.ceowb.in/districtlistaffidavits.aspx";

const DISTRICTS_HTML: &str = r#"<html><head><title>Districts</title></head><body>
<a href="ACLISTAffidavits.aspx?DCID=1">Darjeeling</a>
<a href="ACLISTAffidavits.aspx?DCID=2">Jalpaiguri</a>
<a href="/about.aspx">About</a>
</body></html>"#;

#[test]
fn creates_layout() {
    let dir = tempfile::tempdir().unwrap();
    let site = Arc::new(FakeSite::default());
    let session = open(&dir.path().join("AE-2011-WB"), &site);

    for sub in ["cache", "files", "data"] {
        assert!(session.root().join(sub).is_dir(), "missing {sub}/");
    }
    assert_eq!(session.files_dir(), dir.path().join("AE-2011-WB/files"));
}

#[test]
fn cached_and_uncached_get() {
    let dir = tempfile::tempdir().unwrap();
    let site = Arc::new(FakeSite::default().page(DISTRICTS, DISTRICTS_HTML));
    let session = open(dir.path(), &site);

    let first = session.get::<&str, &str>(DISTRICTS, &[]).unwrap();
    let second = session.get::<&str, &str>(DISTRICTS, &[]).unwrap();
    assert_eq!(first, DISTRICTS_HTML);
    assert_eq!(first, second);
    assert_eq!(site.count(), 1);

    session.get_uncached::<&str, &str>(DISTRICTS, &[]).unwrap();
    session.get_uncached::<&str, &str>(DISTRICTS, &[]).unwrap();
    assert_eq!(site.count(), 3);
}

#[test]
fn http_cache_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let site = Arc::new(FakeSite::default().page(DISTRICTS, DISTRICTS_HTML));

    open(dir.path(), &site)
        .get::<&str, &str>(DISTRICTS, &[])
        .unwrap();
    let page = open(dir.path(), &site)
        .get::<&str, &str>(DISTRICTS, &[])
        .unwrap();

    assert_eq!(page, DISTRICTS_HTML);
    assert_eq!(site.count(), 1);
}

#[test]
fn query_parameters_are_part_of_the_cache_key() {
    let url = "http://www.ceo.kerala.gov.in/affidavit/partsListAjax.html";
    let dir = tempfile::tempdir().unwrap();
    let site = Arc::new(
        FakeSite::default()
            .page(&format!("{url}?distNo=1&lacNo=1"), r#"{"aaData": []}"#)
            .page(&format!("{url}?distNo=1&lacNo=2"), r#"{"aaData": [[1]]}"#),
    );
    let session = open(dir.path(), &site);

    let one = session.get(url, &[("distNo", "1"), ("lacNo", "1")]).unwrap();
    let two = session.get(url, &[("distNo", "1"), ("lacNo", "2")]).unwrap();
    session.get(url, &[("distNo", "1"), ("lacNo", "1")]).unwrap();

    assert_eq!(one, r#"{"aaData": []}"#);
    assert_eq!(two, r#"{"aaData": [[1]]}"#);
    assert_eq!(site.count(), 2);
}

#[test]
fn post_is_never_cached() {
    let dir = tempfile::tempdir().unwrap();
    let site = Arc::new(FakeSite::default());
    let session = open(dir.path(), &site);
    let url = "http://www.ceowb.in/ViewCandidateAffidavits.aspx?AffidavitsID=76";
    let form = [("__VIEWSTATE", "abc"), ("__EVENTTARGET", "lnk")];

    session.post(url, &form).unwrap();
    session.post(url, &form).unwrap();

    assert_eq!(site.count(), 2);
    let last = site.last();
    assert_eq!(last.method, Method::Post);
    assert_eq!(last.form[1], ("__EVENTTARGET".to_string(), "lnk".to_string()));
    assert_eq!(fs::read_dir(session.cache_dir()).unwrap().count(), 0);
}

#[test]
fn invalid_utf8_is_replaced() {
    let url = "http://a.test/latin1";
    let dir = tempfile::tempdir().unwrap();
    let site = Arc::new(FakeSite::default().page(url, b"caf\xe9".to_vec()));
    let session = open(dir.path(), &site);

    assert_eq!(session.get::<&str, &str>(url, &[]).unwrap(), "caf\u{fffd}");
}

#[test]
fn document_and_parse_callback() {
    let dir = tempfile::tempdir().unwrap();
    let site = Arc::new(FakeSite::default().page(DISTRICTS, DISTRICTS_HTML));
    let session = open(dir.path(), &site);

    let html = session.get_document(DISTRICTS).unwrap();
    let title = html
        .select(Selector::parse("title").unwrap())
        .next()
        .unwrap();
    assert_eq!(title.inner_html(), "Districts");

    let links = session
        .get_and_parse(DISTRICTS, |html| {
            html.select(Selector::parse("a").unwrap())
                .filter_map(|a| a.map_value(|v| v.attr("href").map(String::from)).flatten())
                .filter(|href| href.starts_with("ACLISTAffidavits.aspx"))
                .map(|href| join_url(DISTRICTS, &href).map_err(Error::from))
                .collect::<Result<Vec<_>, _>>()
        })
        .unwrap();
    assert_eq!(
        links,
        vec![
            "http://www.ceowb.in/ACLISTAffidavits.aspx?DCID=1",
            "http://www.ceowb.in/ACLISTAffidavits.aspx?DCID=2",
        ]
    );
    assert_eq!(site.count(), 1);

    let err = session
        .get_and_parse(DISTRICTS, |_| -> ea_crawler::Result<()> {
            Err(Error::parse("no table"))
        })
        .unwrap_err();
    assert!(matches!(err, Error::Parse(reason) if reason == "no table"));
}

#[test]
fn download_is_fetched_once() {
    let url = "http://ceowestbengal.nic.in/mis_pdf/election_2011/vt_2011.pdf";
    let dir = tempfile::tempdir().unwrap();
    let site = Arc::new(FakeSite::default().page(url, b"%PDF-1.4 turnout".to_vec()));

    let session = open(dir.path(), &site);
    let bytes = session.download(url, "vt_2011.pdf").unwrap();
    assert_eq!(bytes, b"%PDF-1.4 turnout");
    assert_eq!(
        fs::read(dir.path().join("files/vt_2011.pdf")).unwrap(),
        b"%PDF-1.4 turnout"
    );
    assert!(session.is_downloaded("vt_2011.pdf"));

    session.download(url, "vt_2011.pdf").unwrap();
    let again = open(dir.path(), &site).download(url, "vt_2011.pdf").unwrap();
    assert_eq!(again, bytes);
    assert_eq!(site.count(), 1);

    // downloads go through the uncached transport
    assert_eq!(fs::read_dir(session.cache_dir()).unwrap().count(), 0);
}

#[test]
fn form_download_is_memoized() {
    let url = "http://www.ceowb.in/ViewCandidateAffidavits.aspx?AffidavitsID=76";
    let dir = tempfile::tempdir().unwrap();
    let site = Arc::new(FakeSite::default());
    let session = open(dir.path(), &site);

    let form = vec![
        ("__VIEWSTATE".to_string(), "abc".to_string()),
        ("__EVENTTARGET".to_string(), "dlsCr".to_string()),
    ];
    let first = session.download_form(url, &form, "76-CR.pdf").unwrap();
    let second = session.download_form(url, &form, "76-CR.pdf").unwrap();

    assert_eq!(first, second);
    assert_eq!(site.count(), 1);
    assert_eq!(site.last().method, Method::Post);
    assert_eq!(site.last().form, form);
    assert!(dir.path().join("files/76-CR.pdf").is_file());
}

#[test]
fn batch_download_skips_broken_links() {
    let dir = tempfile::tempdir().unwrap();
    let mut site = FakeSite::default();
    let mut items = vec![];
    for i in 1..=5 {
        let url = format!("http://ceopondicherry.nic.in/AFFIDAVITS2011/{i}.pdf");
        if i != 3 {
            site = site.page(&url, format!("affidavit {i}"));
        }
        items.push(Downloadable::new(
            format!("files/ceopondicherry.nic.in/AFFIDAVITS2011/{i}.pdf"),
            url,
        ));
    }
    let site = Arc::new(site);
    let session = open(dir.path(), &site);

    let report = session
        .download_all(items.clone(), OnError::SkipAndLog)
        .unwrap();

    assert_eq!(report.succeeded.len(), 4);
    assert_eq!(report.failed.len(), 1);
    let (failed, err) = &report.failed[0];
    assert_eq!(failed, &items[2]);
    assert!(matches!(
        err,
        Error::Transport(TransportError::Status { status: 404, .. })
    ));
    for i in [1, 2, 4, 5] {
        let path = session
            .files_dir()
            .join(format!("ceopondicherry.nic.in/AFFIDAVITS2011/{i}.pdf"));
        assert_eq!(fs::read_to_string(path).unwrap(), format!("affidavit {i}"));
    }

    // a second run only retries what is missing
    let report = session.download_all(items.clone(), OnError::SkipAndLog).unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(site.count(), 6);

    assert!(session.download_all(items, OnError::Fail).is_err());
}

#[test]
fn each_transport_has_its_own_throttle() {
    let dir = tempfile::tempdir().unwrap();
    let site = Arc::new(FakeSite::default());
    let config = CrawlerConfig {
        throttle: ThrottleConfig {
            get: 0.,
            get_uncached: 0.,
            post: 0.05,
        },
        ..Default::default()
    };
    let session = Session::with_backend(dir.path(), &config, site.clone()).unwrap();

    let start = Instant::now();
    for _ in 0..3 {
        session.post::<&str, &str>("http://a.test/form", &[]).unwrap();
    }
    assert!(start.elapsed() >= Duration::from_millis(100));

    let start = Instant::now();
    for i in 0..3 {
        session
            .get_uncached::<&str, &str>(&format!("http://a.test/{i}"), &[])
            .ok();
    }
    assert!(start.elapsed() < Duration::from_millis(50));
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct District {
    id: String,
    name: String,
}

#[test]
fn memoized_scraper_operation() {
    let dir = tempfile::tempdir().unwrap();
    let site = Arc::new(FakeSite::default().page(DISTRICTS, DISTRICTS_HTML));
    let session = open(dir.path(), &site);
    let parsed = Mutex::new(0);

    let districts = Memoized::new(
        "data/districts_%(page)s.json",
        Signature::new().optional("page", 1),
        |session: &Session, _: &Bindings| -> ea_crawler::Result<Json<Vec<District>>> {
            *parsed.lock().unwrap() += 1;
            session.get_and_parse(DISTRICTS, |html| {
                Ok(Json(
                    html.select(Selector::parse("a").unwrap())
                        .filter_map(|a| {
                            let href = a.map_value(|v| v.attr("href").map(String::from))??;
                            let id = href.split("DCID=").nth(1)?.to_string();
                            Some(District {
                                id,
                                name: a.inner_html(),
                            })
                        })
                        .collect(),
                ))
            })
        },
    )
    .unwrap();

    let first = districts.call(&session, &Args::new()).unwrap().into_inner();
    let second = districts.call(&session, &Args::new()).unwrap().into_inner();

    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
    assert_eq!(first[1].name, "Jalpaiguri");
    assert_eq!(*parsed.lock().unwrap(), 1);

    let stored: Value =
        serde_json::from_slice(&fs::read(dir.path().join("data/districts_1.json")).unwrap())
            .unwrap();
    assert_eq!(stored[0], json!({"id": "1", "name": "Darjeeling"}));
}

struct ListedSite {
    root: PathBuf,
    items: Vec<Downloadable>,
    finalized: bool,
}

impl Site for ListedSite {
    type Config = (PathBuf, Vec<Downloadable>);

    fn new((root, items): &Self::Config) -> ea_crawler::Result<Self> {
        Ok(Self {
            root: root.clone(),
            items: items.clone(),
            finalized: false,
        })
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn downloadables(&mut self, _session: &Session) -> ea_crawler::Result<Vec<Downloadable>> {
        Ok(self.items.clone())
    }

    fn finalizer(&mut self) {
        self.finalized = true;
    }
}

#[test]
fn crawl_a_site() {
    let dir = tempfile::tempdir().unwrap();
    let site = Arc::new(
        FakeSite::default()
            .page("http://a.test/1.pdf", "one")
            .page("http://a.test/2.pdf", "two"),
    );
    let items = vec![
        Downloadable::new("files/a/1.pdf", "http://a.test/1.pdf"),
        Downloadable::new("files/a/2.pdf", "http://a.test/2.pdf"),
        Downloadable::new("files/a/3.pdf", "http://a.test/3.pdf"),
    ];
    let mut listed = ListedSite::new(&(dir.path().to_path_buf(), items)).unwrap();
    let session = open(listed.root(), &site);

    let report = crawl_with(&mut listed, &session, OnError::SkipAndLog).unwrap();

    assert!(listed.finalized);
    assert_eq!(report.succeeded.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(site.count_for("http://a.test/3.pdf"), 1);
    assert_eq!(
        fs::read_to_string(dir.path().join("files/a/2.pdf")).unwrap(),
        "two"
    );
}

#[test]
fn oversized_throttle_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let site = Arc::new(FakeSite::default());
    let config = CrawlerConfig {
        throttle: ThrottleConfig {
            get: 1e30,
            ..ThrottleConfig::none()
        },
        ..Default::default()
    };

    let err = Session::with_backend(dir.path().join("site"), &config, site).unwrap_err();

    assert!(matches!(err, Error::Config(reason) if reason.starts_with("throttle.get:")));
    assert!(!dir.path().join("site").exists());
}

#[test]
fn invalid_destinations_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let site = Arc::new(
        FakeSite::default()
            .page("http://a.test/0.pdf", "zero")
            .page("http://a.test/1.pdf", "one"),
    );
    let session = open(dir.path(), &site);
    fs::create_dir_all(session.files_dir().join("ceo")).unwrap();

    let items = vec![
        Downloadable::new("files/", "http://a.test/0.pdf"),
        Downloadable::new("files/../escape.pdf", "http://a.test/0.pdf"),
        Downloadable::new("files/ceo", "http://a.test/0.pdf"),
        Downloadable::new("files/ceo/1.pdf", "http://a.test/1.pdf"),
    ];
    let report = session
        .download_all(items.clone(), OnError::SkipAndLog)
        .unwrap();

    assert_eq!(report.succeeded, vec![items[3].clone()]);
    assert_eq!(report.failed.len(), 3);
    assert!(report
        .failed
        .iter()
        .all(|(_, e)| matches!(e, Error::Destination { .. })));
    assert_eq!(site.count(), 1);
    assert!(!dir.path().join("escape.pdf").exists());

    assert!(matches!(
        session.download("http://a.test/0.pdf", ""),
        Err(Error::Destination { .. })
    ));
    assert!(session.download_all(items, OnError::Fail).is_err());
}
