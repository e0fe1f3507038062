use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use harness_assert::{
    AssertError, Check, ExactMatch, Matcher, OccurrenceSearch, OutputCondition,
    OutputConditionSpec, Section,
};
use harness_log::priority::{STDERR, STDOUT};
use harness_log::{
    LogConfig, LoggerRef, LoggerRegistry, MemorySink, Outcome, PriorityLineBuffer, Stream,
    UnitHandle, UnitKind,
};

fn serial() -> MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

fn stdout(lines: &[&str]) -> PriorityLineBuffer {
    let buffer = PriorityLineBuffer::new();
    for line in lines {
        buffer.append(STDOUT, line);
    }
    buffer
}

fn parse(raw: &str) -> Result<OutputCondition, AssertError> {
    let spec: OutputConditionSpec = toml::from_str(raw).expect("valid TOML");
    OutputCondition::try_from(spec)
}

#[test]
fn exact_match_properties() {
    let hello = Check::from(ExactMatch::new("hello"));
    assert!(hello.evaluate(&stdout(&["hello"]), STDOUT).passed);
    assert!(!hello.evaluate(&stdout(&["hello", "world"]), STDOUT).passed);
    assert!(Check::from(ExactMatch::new(""))
        .evaluate(&stdout(&[]), STDOUT)
        .passed);
}

#[test]
fn occurrence_search_properties() {
    let output = stdout(&["abc", "xabcx", "abc"]);
    let search = |min, max| {
        Check::from(
            OccurrenceSearch::new(Matcher::substring("abc").unwrap())
                .bounds(min, max)
                .unwrap(),
        )
    };
    let verdict = search(2, Some(3)).evaluate(&output, STDOUT);
    assert!(verdict.passed, "{verdict}");
    assert_eq!(verdict.occurrences, 3);
    assert!(!search(4, None).evaluate(&output, STDOUT).passed);
}

#[test]
fn section_checks_each_extracted_range() {
    let output = stdout(&["start A", "mid", "end B", "start C", "end D"]);
    let three_lines = |skip| {
        let inner = OccurrenceSearch::new(Matcher::regex("^.").unwrap())
            .bounds(3, Some(3))
            .unwrap();
        Check::from(
            Section::builder()
                .begin("start")
                .end("end")
                .skip(skip)
                .build(inner.into())
                .unwrap(),
        )
    };
    assert!(three_lines(0).evaluate(&output, STDOUT).passed);
    assert!(!three_lines(1).evaluate(&output, STDOUT).passed);

    let exact_pair = Section::builder()
        .begin("start")
        .end("end")
        .skip(1)
        .build(Check::from(ExactMatch::new("start C")))
        .unwrap();
    let verdict = Check::from(exact_pair).evaluate(&output, STDOUT);
    assert!(!verdict.passed);
    assert!(verdict.message.contains("found 2 lines"), "{verdict}");
}

#[test]
fn repeated_sections_must_all_pass() {
    let output = stdout(&["begin", "ok", "end", "begin", "boom", "end"]);
    let section = |pattern: &str| {
        let inner = OccurrenceSearch::new(Matcher::substring(pattern).unwrap());
        Check::from(
            Section::builder()
                .begin("^begin$")
                .end("^end$")
                .repeat(2)
                .build(inner.into())
                .unwrap(),
        )
    };
    assert!(section("e").evaluate(&output, STDOUT).passed);
    let verdict = section("ok").evaluate(&output, STDOUT);
    assert!(!verdict.passed);
    assert!(verdict.message.starts_with("[1]"), "{verdict}");
}

#[test]
fn conditions_parse_from_toml_and_json() {
    let condition = parse(
        r#"
        logger = "server"
        stream = "STDERR"
        warning = true

        [check.section]
        begin = "^config"
        end = "^done"
        begin_after = 1

        [check.section.check]
        regex = "port=\\d+"
        max = 1
        "#,
    )
    .unwrap();
    assert_eq!(condition.logger(), &LoggerRef::name("server"));
    assert_eq!(condition.stream(), Stream::Stderr);
    assert!(condition.is_warning());
    assert!(matches!(condition.check(), Check::Section(_)));

    let spec: OutputConditionSpec = serde_json::from_str(
        r#"{ "logger": -1, "check": { "exact": "ready", "strip_ansi": true } }"#,
    )
    .unwrap();
    let condition = OutputCondition::try_from(spec).unwrap();
    assert_eq!(condition.logger(), &LoggerRef::Ordinal(-1));
    assert_eq!(condition.stream(), Stream::Stdout);
    assert!(!condition.is_warning());
}

#[test]
fn malformed_conditions_are_errors() {
    assert!(matches!(
        parse("logger = \"x\"\nstream = \"console\"\n[check]\ncontains = \"a\""),
        Err(AssertError::UnknownStream(_))
    ));
    assert!(matches!(
        parse(
            "logger = \"x\"\n[check.section]\nrepeat = 2\nbegin = \"a\"\n\
             [check.section.check]\ncontains = \"a\""
        ),
        Err(AssertError::RepeatWithoutMarkers { repeat: 2 })
    ));
    assert!(matches!(
        parse(
            "logger = \"x\"\n[check.section]\nbegin = \"start\"\nbegin_after = 1\n\
             [check.section.check]\ncontains = \"x\""
        ),
        Err(AssertError::SkipWithoutEnd { skip: 1 })
    ));
    assert!(matches!(
        parse("logger = \"x\"\n[check]\nregex = \"[\""),
        Err(AssertError::InvalidRegex { .. })
    ));
    let unknown_field = "logger = \"x\"\ncolour = true\n[check]\nexact = \"\"";
    assert!(toml::from_str::<OutputConditionSpec>(unknown_field).is_err());
}

#[test]
fn conditions_resolve_loggers_through_the_registry() {
    let _guard = serial();
    let sink = Arc::new(MemorySink::new());
    let root = UnitHandle::new(0, UnitKind::Suite, "run");
    let registry =
        LoggerRegistry::init_with_sink(root.clone(), LogConfig::default(), sink.clone());

    let service = UnitHandle::new(1, UnitKind::Service, "web");
    let start = UnitHandle::new(2, UnitKind::StartPhase, "start");
    let server = UnitHandle::new(3, UnitKind::Process { background: true }, "server");
    let verify = UnitHandle::new(4, UnitKind::VerifyPhase, "verify");
    let case = UnitHandle::new(5, UnitKind::TestCase, "check");

    registry.unit_started(&service).unwrap();
    registry.unit_started(&start).unwrap();
    let server_logger = registry.unit_started(&server).unwrap().unwrap();
    server_logger.append_output(STDOUT, "listening on 8080\nready");
    server_logger.append_output(STDERR, "deprecated flag");
    registry.unit_finished(&server, None).unwrap();
    registry.unit_finished(&start, None).unwrap();

    let verify_logger = registry.unit_started(&verify).unwrap().unwrap();
    let ready = OutputCondition::new(
        LoggerRef::name("server"),
        Stream::Stdout,
        OccurrenceSearch::new(Matcher::regex("^ready$").unwrap()),
    );
    let verdict = ready.enforce(&registry, &verify_logger);
    assert!(verdict.passed, "{verdict}");
    assert!(verdict.message.starts_with("run/web/start/server stdout"));

    let quiet =
        OutputCondition::new(LoggerRef::name("server"), Stream::Stderr, ExactMatch::new(""))
            .as_warning(true);
    assert!(!quiet.enforce(&registry, &verify_logger).passed);

    let missing =
        OutputCondition::new(LoggerRef::name("client"), Stream::Stdout, ExactMatch::new(""));
    let verdict = missing.evaluate(&registry);
    assert!(!verdict.passed);
    assert!(verdict.message.contains("no logger `client`"));
    registry.unit_finished(&verify, None).unwrap();

    registry.unit_started(&case).unwrap();
    let case_logger = registry.logger_for(&case).unwrap();
    let strict = OutputCondition::new(
        LoggerRef::name("server"),
        Stream::Stdout,
        ExactMatch::new("ready"),
    );
    assert!(!strict.enforce(&registry, &case_logger).passed);
    registry.unit_finished(&case, None).unwrap();
    registry.unit_finished(&service, None).unwrap();
    registry.unit_finished(&root, None).unwrap();

    let verify_record = sink.find("run/web/verify").unwrap();
    assert_eq!(verify_record.outcome, Outcome::Warning);
    assert!(verify_record.description.contains("deprecated flag"));
    assert_eq!(sink.find("run/web/check").unwrap().outcome, Outcome::Failed);
}
