//! Streaming JUnit XML report parser.
//!
//! [`ReportReader`] walks the document with `quick-xml` pull events and
//! yields one [`TestSuiteEntry`] per `<testsuite>` followed by one
//! [`TestResultEntry`] per `<testcase>` it contains, in document order.
//! No document tree is built.
//!
//! # Attributes read
//!
//! | Element | Required | Optional |
//! |---------|----------|----------|
//! | `testsuite` | `name`, `time`, `tests`, `timestamp`, `errors`, `failures` | `skipped` (default 0) |
//! | `testcase` | `classname`, `name`, `time` | |
//! | `failure` / `error` | | `message`, `type`, element text |
//! | `skipped` | | |
//!
//! A test case with both a `<failure>` and an `<error>` child is a failure.
//! Either outranks `<skipped>`.
//!
//! Timestamps are RFC 3339, or ISO 8601 without an offset (as written by
//! Ant and Maven Surefire), which is read as UTC.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use uuid::Uuid;

use junit_harness_core::{
    FailureInfo, FailureKind, HarnessError, ReportedTestElement, Result, TestResultEntry,
    TestSuiteEntry,
};

/// Parse a report file completely.
///
/// The whole file is validated before anything is returned, so a report
/// that turns out to be malformed halfway through produces no entities.
pub fn parse_report(path: &Path) -> Result<Vec<ReportedTestElement>> {
    let path = std::fs::canonicalize(path)?;
    let file = File::open(&path)?;
    ReportReader::new(BufReader::new(file), &path).collect()
}

/// Pull parser over one report.
///
/// `path` is only used to stamp suites with their containing file and
/// folder and to label errors; the XML is read from `source`.
pub struct ReportReader<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    path: PathBuf,
    file_name: String,
    folder: PathBuf,
    seen_suite: bool,
    open_suites: usize,
    case: Option<PendingCase>,
    problem: Option<PendingProblem>,
    done: bool,
}

struct PendingCase {
    qualified_name: String,
    method_name: String,
    time: String,
    failure: Option<FailureInfo>,
    skipped: bool,
}

struct PendingProblem {
    kind: FailureKind,
    message: Option<String>,
    exception_name: Option<String>,
    details: String,
}

impl<R: BufRead> ReportReader<R> {
    pub fn new(source: R, path: &Path) -> Self {
        let mut reader = Reader::from_reader(source);
        reader.config_mut().trim_text(false);

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let folder = path.parent().map(Path::to_path_buf).unwrap_or_default();

        Self {
            reader,
            buf: Vec::new(),
            path: path.to_path_buf(),
            file_name,
            folder,
            seen_suite: false,
            open_suites: 0,
            case: None,
            problem: None,
            done: false,
        }
    }

    fn fail(&mut self, reason: impl Into<String>) -> Option<Result<ReportedTestElement>> {
        self.done = true;
        Some(Err(HarnessError::parse(&self.path, reason)))
    }

    fn suite(&self, attrs: &HashMap<String, String>) -> Result<ReportedTestElement> {
        let qualified_name = self.required(attrs, "testsuite", "name")?;
        if qualified_name.is_empty() {
            return Err(HarnessError::parse(&self.path, "testsuite has an empty name"));
        }
        let time = self.required(attrs, "testsuite", "time")?;
        let timestamp_raw = self.required(attrs, "testsuite", "timestamp")?;
        let timestamp = parse_timestamp(&timestamp_raw).ok_or_else(|| {
            HarnessError::parse(
                &self.path,
                format!("testsuite timestamp '{}' is not a date-time", timestamp_raw),
            )
        })?;

        Ok(ReportedTestElement::Suite(TestSuiteEntry {
            storage_id: Uuid::new_v4(),
            qualified_name,
            time,
            containing_file: self.file_name.clone(),
            containing_folder: self.folder.clone(),
            timestamp,
            tests_run: self.count(attrs, "tests")?,
            total_errors: self.count(attrs, "errors")?,
            total_failures: self.count(attrs, "failures")?,
            total_skipped: match attrs.get("skipped") {
                Some(_) => self.count(attrs, "skipped")?,
                None => 0,
            },
        }))
    }

    fn on_suite(&mut self, e: &BytesStart<'_>) -> Result<ReportedTestElement> {
        match self.attributes(e).and_then(|attrs| self.suite(&attrs)) {
            Ok(suite) => {
                self.seen_suite = true;
                Ok(suite)
            }
            Err(err) => {
                self.done = true;
                Err(err)
            }
        }
    }

    fn begin_case(&self, attrs: &HashMap<String, String>) -> Result<PendingCase> {
        if !self.seen_suite {
            return Err(HarnessError::parse(
                &self.path,
                "testcase appears before any testsuite",
            ));
        }
        Ok(PendingCase {
            qualified_name: self.required(attrs, "testcase", "classname")?,
            method_name: self.required(attrs, "testcase", "name")?,
            time: self.required(attrs, "testcase", "time")?,
            failure: None,
            skipped: false,
        })
    }

    fn required(
        &self,
        attrs: &HashMap<String, String>,
        element: &str,
        name: &str,
    ) -> Result<String> {
        attrs.get(name).cloned().ok_or_else(|| {
            HarnessError::parse(
                &self.path,
                format!("{} is missing the '{}' attribute", element, name),
            )
        })
    }

    fn count(&self, attrs: &HashMap<String, String>, name: &str) -> Result<i64> {
        let raw = self.required(attrs, "testsuite", name)?;
        raw.trim().parse::<i64>().map_err(|_| {
            HarnessError::parse(
                &self.path,
                format!("testsuite attribute {}='{}' is not a number", name, raw),
            )
        })
    }

    fn attributes(&self, e: &BytesStart<'_>) -> Result<HashMap<String, String>> {
        let mut out = HashMap::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| HarnessError::parse(&self.path, err.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|err| HarnessError::parse(&self.path, err.to_string()))?
                .into_owned();
            out.insert(key, value);
        }
        Ok(out)
    }

    fn begin_problem(&self, kind: FailureKind, e: &BytesStart<'_>) -> Result<PendingProblem> {
        let mut attrs = self.attributes(e)?;
        Ok(PendingProblem {
            kind,
            message: attrs.remove("message"),
            exception_name: attrs.remove("type"),
            details: String::new(),
        })
    }

    fn case_child(&mut self, e: &BytesStart<'_>, self_closing: bool) -> Result<()> {
        let kind = match e.local_name().as_ref() {
            b"failure" => FailureKind::Failure,
            b"error" => FailureKind::Error,
            b"skipped" => {
                if let Some(case) = self.case.as_mut() {
                    case.skipped = true;
                }
                return Ok(());
            }
            _ => return Ok(()),
        };
        self.problem = Some(self.begin_problem(kind, e)?);
        if self_closing {
            self.finish_problem();
        }
        Ok(())
    }

    fn finish_problem(&mut self) {
        let (Some(problem), Some(case)) = (self.problem.take(), self.case.as_mut()) else {
            return;
        };
        let keep_existing = matches!(
            (&case.failure, problem.kind),
            (Some(existing), FailureKind::Error) if existing.kind == FailureKind::Failure
        );
        if !keep_existing {
            case.failure = Some(FailureInfo {
                message: problem.message,
                exception_name: problem.exception_name,
                details: problem.details.trim().to_string(),
                kind: problem.kind,
            });
        }
    }

    fn finish_case(&mut self) -> Option<ReportedTestElement> {
        self.finish_problem();
        self.case.take().map(|case| {
            ReportedTestElement::Result(TestResultEntry {
                storage_id: Uuid::new_v4(),
                qualified_name: case.qualified_name,
                method_name: case.method_name,
                time: case.time,
                failure: case.failure,
                skipped: case.skipped,
            })
        })
    }
}

impl<R: BufRead> Iterator for ReportReader<R> {
    type Item = Result<ReportedTestElement>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            self.buf.clear();
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(event) => event.into_owned(),
                Err(e) => {
                    let position = self.reader.buffer_position();
                    return self.fail(format!("malformed XML at byte {}: {}", position, e));
                }
            };

            match event {
                Event::Start(e) if e.local_name().as_ref() == b"testsuite" => {
                    self.open_suites += 1;
                    return Some(self.on_suite(&e));
                }
                Event::Empty(e) if e.local_name().as_ref() == b"testsuite" => {
                    return Some(self.on_suite(&e));
                }
                Event::Start(e) if e.local_name().as_ref() == b"testcase" => {
                    match self.attributes(&e).and_then(|attrs| self.begin_case(&attrs)) {
                        Ok(case) => self.case = Some(case),
                        Err(err) => {
                            self.done = true;
                            return Some(Err(err));
                        }
                    }
                }
                Event::Empty(e) if e.local_name().as_ref() == b"testcase" => {
                    match self.attributes(&e).and_then(|attrs| self.begin_case(&attrs)) {
                        Ok(case) => {
                            self.case = Some(case);
                            return self.finish_case().map(Ok);
                        }
                        Err(err) => {
                            self.done = true;
                            return Some(Err(err));
                        }
                    }
                }
                Event::Start(e) if self.case.is_some() => {
                    if let Err(err) = self.case_child(&e, false) {
                        self.done = true;
                        return Some(Err(err));
                    }
                }
                Event::Empty(e) if self.case.is_some() => {
                    if let Err(err) = self.case_child(&e, true) {
                        self.done = true;
                        return Some(Err(err));
                    }
                }
                Event::Text(t) if self.problem.is_some() => {
                    let text = match t.unescape() {
                        Ok(text) => text.into_owned(),
                        Err(e) => return self.fail(e.to_string()),
                    };
                    if let Some(problem) = self.problem.as_mut() {
                        problem.details.push_str(&text);
                    }
                }
                Event::CData(c) => {
                    if let Some(problem) = self.problem.as_mut() {
                        problem.details.push_str(&String::from_utf8_lossy(&c));
                    }
                }
                Event::End(e) => match e.local_name().as_ref() {
                    b"failure" | b"error" => self.finish_problem(),
                    b"testsuite" => self.open_suites = self.open_suites.saturating_sub(1),
                    b"testcase" => {
                        if let Some(result) = self.finish_case() {
                            return Some(Ok(result));
                        }
                    }
                    _ => {}
                },
                Event::Eof => {
                    if self.case.is_some() {
                        return self.fail("unexpected end of file inside a testcase");
                    }
                    if self.open_suites > 0 {
                        return self.fail("unexpected end of file inside a testsuite");
                    }
                    if !self.seen_suite {
                        return self.fail("no <testsuite> element found");
                    }
                    self.done = true;
                    return None;
                }
                _ => {}
            }
        }
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
