//! Full extraction passes over a temp source tree and a scripted indexer.

use diffscope_config::AppConfig;
use diffscope_core::lsp::{Session, SessionOptions};
use diffscope_core::{ContextExtractor, ExtractError};
use diffscope_test_utils::fake_indexer::{location, symbol};
use diffscope_test_utils::tracing_setup::init_test_tracing;
use diffscope_test_utils::{FakeIndexer, FakeIndexerHandle, SourceFixture, TestConfigBuilder};
use pretty_assertions::assert_eq;
use serde_json::json;

const A_C: &str = "#include \"b.h\"\n\nint main(void)\n{\n\treturn foo();\n}\n";

const A_DIFF: &str = "\
diff --git a/a.c b/a.c
--- a/a.c
+++ b/a.c
@@ -1,5 +1,6 @@
 #include \"b.h\"
 
 int main(void)
 {
+\treturn foo();
 }
";

/// `b.h`: 50 lines with `struct Bar` on 38..=46 and its member `foo` on
/// 40..=44.
fn b_h_lines() -> Vec<String> {
    let mut lines: Vec<String> = (0..38).map(|i| format!("/* filler {i} */")).collect();
    lines.extend(
        [
            "struct Bar {",
            "\tint x;",
            "\tint (*foo)(int a,",
            "\t\t   int b,",
            "\t\t   int c,",
            "\t\t   int d,",
            "\t\t   int e);",
            "\tint y;",
            "};",
        ]
        .map(String::from),
    );
    lines.extend((47..50).map(|i| format!("/* filler {i} */")));
    lines
}

fn b_h() -> String {
    b_h_lines().iter().map(|l| format!("{l}\n")).collect()
}

fn config() -> AppConfig {
    TestConfigBuilder::new().build()
}

async fn session_for(fake: FakeIndexer, fixture: &SourceFixture) -> (Session, FakeIndexerHandle) {
    let (reader, writer, handle) = fake.start();
    let session = Session::connect(reader, writer, SessionOptions::from_config(&config(), fixture.root()))
        .await
        .expect("handshake failed");
    (session, handle)
}

fn bar_indexer(fixture: &SourceFixture) -> FakeIndexer {
    let b = fixture.uri("b.h");
    FakeIndexer::new()
        .definition("foo", location(&b, 40, 40))
        .definition("bar", location(&b, 45, 45))
        .document_symbols(
            &b,
            json!([symbol(
                "Bar",
                38,
                46,
                vec![symbol("x", 39, 39, vec![]), symbol("foo", 40, 44, vec![]), symbol("bar", 45, 45, vec![])]
            )]),
        )
        .document_symbols(&fixture.uri("a.c"), json!([symbol("main", 2, 5, vec![])]))
}

#[tokio::test]
async fn test_member_definition_widens_to_enclosing_struct() {
    init_test_tracing();
    let fixture = SourceFixture::new();
    fixture.write("a.c", A_C);
    fixture.write("b.h", &b_h());

    let (mut session, handle) = session_for(bar_indexer(&fixture), &fixture).await;
    let extractor = ContextExtractor::new(config(), fixture.root());
    let outcome = extractor.extract_with_session(&session, A_DIFF).await.unwrap();
    session.shutdown().await;

    let records: Vec<_> = outcome.definitions.records().cloned().collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].file, fixture.path("b.h"));
    assert_eq!((records[0].start_line, records[0].end_line), (38, 46));
    assert_eq!(records[0].label, "parent_of_foo");

    let struct_body: String = b_h_lines()[38..=46].iter().map(|l| format!("{l}\n")).collect();
    let expected = format!(
        "a.c (definition/diff context):\n\n```c\n\
         \treturn foo();\n```\n\
         \n\n\
         b.h (definition/diff context):\n\n```c\n\
         // skipping lines 1-38\n{struct_body}```\n"
    );
    assert_eq!(outcome.bundle.render(), expected);

    // "return" and "foo" were looked up, each once.
    assert_eq!(handle.count("textDocument/definition"), 2);
    assert_eq!(outcome.indexing, None);
}

#[tokio::test]
async fn test_identical_ranges_are_recorded_once() {
    let fixture = SourceFixture::new();
    let a_c = "int main(void)\n{\n\treturn foo(1) + bar + foo(2);\n}\n";
    fixture.write("a.c", a_c);
    fixture.write("b.h", &b_h());
    let diff = "+++ b/a.c\n@@ -1,3 +1,4 @@\n int main(void)\n {\n+\treturn foo(1) + bar + foo(2);\n }\n";

    let (mut session, handle) = session_for(bar_indexer(&fixture), &fixture).await;
    let extractor = ContextExtractor::new(config(), fixture.root());
    let outcome = extractor.extract_with_session(&session, diff).await.unwrap();
    session.shutdown().await;

    // foo and bar both widen to struct Bar.
    assert_eq!(outcome.definitions.len(), 1);
    // return, foo, bar: the second foo is already seen.
    assert_eq!(handle.count("textDocument/definition"), 3);
    assert_eq!(outcome.bundle.len(), 2);
}

#[tokio::test]
async fn test_name_with_already_recorded_range_is_not_looked_up_again() {
    let fixture = SourceFixture::new();
    let a_c = "int main(void)\n{\n\treturn foo(1) + bar + bar;\n}\n";
    fixture.write("a.c", a_c);
    fixture.write("b.h", &b_h());
    let diff = "+++ b/a.c\n@@ -1,3 +1,4 @@\n int main(void)\n {\n+\treturn foo(1) + bar + bar;\n }\n";

    let (mut session, handle) = session_for(bar_indexer(&fixture), &fixture).await;
    let extractor = ContextExtractor::new(config(), fixture.root());
    let outcome = extractor.extract_with_session(&session, diff).await.unwrap();
    session.shutdown().await;

    // bar widens to the range foo already recorded; it still counts as seen.
    assert_eq!(outcome.definitions.len(), 1);
    assert_eq!(handle.count("textDocument/definition"), 3);
}

#[tokio::test]
async fn test_nothing_resolved_gives_empty_bundle() {
    let fixture = SourceFixture::new();
    fixture.write("a.c", A_C);

    let (mut session, _handle) = session_for(FakeIndexer::new(), &fixture).await;
    let extractor = ContextExtractor::new(config(), fixture.root());
    let outcome = extractor.extract_with_session(&session, A_DIFF).await.unwrap();
    session.shutdown().await;

    assert!(outcome.definitions.is_empty());
    assert_eq!(outcome.bundle.render(), "");
    assert_eq!(outcome.additions.added_line_count(), 1);
}

#[tokio::test]
async fn test_definition_errors_are_skipped() {
    let fixture = SourceFixture::new();
    fixture.write("a.c", A_C);
    fixture.write("b.h", &b_h());

    let fake = bar_indexer(&fixture).definition_error("return");
    let (mut session, _handle) = session_for(fake, &fixture).await;
    let extractor = ContextExtractor::new(config(), fixture.root());
    let outcome = extractor.extract_with_session(&session, A_DIFF).await.unwrap();
    session.shutdown().await;

    assert_eq!(outcome.definitions.len(), 1);
}

#[tokio::test]
async fn test_missing_changed_file_is_skipped() {
    let fixture = SourceFixture::new();
    fixture.write("b.h", &b_h());

    let (mut session, handle) = session_for(bar_indexer(&fixture), &fixture).await;
    let extractor = ContextExtractor::new(config(), fixture.root());
    let outcome = extractor.extract_with_session(&session, A_DIFF).await.unwrap();
    session.shutdown().await;

    assert!(outcome.bundle.is_empty());
    assert_eq!(handle.count("textDocument/didOpen"), 0);
}

#[tokio::test]
async fn test_fatal_session_error_aborts_the_pass() {
    let fixture = SourceFixture::new();
    fixture.write("a.c", A_C);
    fixture.write("b.h", &b_h());

    let fake = bar_indexer(&fixture).garbage_on("textDocument/definition");
    let (mut session, _handle) = session_for(fake, &fixture).await;
    let extractor = ContextExtractor::new(config(), fixture.root());
    let err = extractor.extract_with_session(&session, A_DIFF).await.unwrap_err();
    session.shutdown().await;

    let ExtractError::Session(inner) = err;
    assert!(inner.is_fatal());
}

#[tokio::test]
async fn test_full_file_scope_scans_unchanged_lines() {
    let fixture = SourceFixture::new();
    let a_c = "int main(void)\n{\n\treturn foo(1);\n}\n";
    fixture.write("a.c", a_c);
    fixture.write("b.h", &b_h());
    // Adds only the closing brace; `foo` sits on an unchanged line.
    let diff = "+++ b/a.c\n@@ -1,3 +1,4 @@\n int main(void)\n {\n \treturn foo(1);\n+}\n";

    let (mut session, _handle) = session_for(bar_indexer(&fixture), &fixture).await;
    let added_only = ContextExtractor::new(config(), fixture.root());
    let outcome = added_only.extract_with_session(&session, diff).await.unwrap();
    assert!(outcome.definitions.is_empty());

    let full_file = ContextExtractor::new(TestConfigBuilder::new().full_file().build(), fixture.root());
    let outcome = full_file.extract_with_session(&session, diff).await.unwrap();
    session.shutdown().await;
    assert_eq!(outcome.definitions.len(), 1);
}
