//! Integration tests for the module server context.
//!
//! Tests drive the public API the way the HTTP layer does: request modules,
//! mutate project files on disk, and observe the notifications pushed to
//! registered event-stream clients.

mod helpers;

use helpers::*;

use flint_server::ChangeEvent;
use tempfile::TempDir;

#[tokio::test]
async fn test_import_chain_serves_rewritten_modules() {
    let dir = TempDir::new().unwrap();
    let c = write_file(dir.path(), "c.js", "export const c = 3;\n");
    let b = write_file(dir.path(), "b.js", "import { c } from './c.js';\nexport const b = c;\n");
    let a = write_file(dir.path(), "a.js", "import { b } from './b.js';\nexport const a = b;\n");
    let context = start_context(dir.path()).await;

    let served_a = context.module(&a).await;
    assert!(served_a.code.contains(&context.options().address.module_url(&b)));

    let served_b = context.module(&b).await;
    assert!(served_b.code.contains(&context.options().address.module_url(&c)));

    assert_eq!(context.cache().len(), 2);
    assert!(context.graph().is_tracked(&c));
}

#[tokio::test]
async fn test_change_deep_in_the_chain_notifies_the_terminal_dependent() {
    let dir = TempDir::new().unwrap();
    let c = write_file(dir.path(), "c.js", "export const c = 3;\n");
    let b = write_file(dir.path(), "b.js", "import { c } from './c.js';\nexport const b = c;\n");
    let a = write_file(dir.path(), "a.js", "import { b } from './b.js';\nexport const a = b;\n");
    let context = start_context(dir.path()).await;

    context.module(&a).await;
    context.module(&b).await;
    let (_id, mut rx) = context.clients().register();
    settle_watcher().await;

    std::fs::write(&c, "export const c = 4;\n").unwrap();
    let event = wait_for_event(&mut rx, |event| matches!(event, ChangeEvent::Change { .. })).await;

    // Nothing along the chain self-accepts, so the update bubbles to the
    // top importer and the client reloads from there.
    assert_eq!(event, ChangeEvent::Change { file: a.clone() });
}

#[tokio::test]
async fn test_changed_stylesheet_hot_updates_itself() {
    let dir = TempDir::new().unwrap();
    let css = write_file(dir.path(), "style.css", "body { color: red; }\n");
    let main = write_file(dir.path(), "main.js", "import './style.css';\n");
    let context = start_context(dir.path()).await;

    context.module(&main).await;
    context.module(&css).await;
    let (_id, mut rx) = context.clients().register();
    settle_watcher().await;

    std::fs::write(&css, "body { color: blue; }\n").unwrap();
    let event = wait_for_event(&mut rx, |event| matches!(event, ChangeEvent::Change { .. })).await;

    // The style module self-accepts, so bubbling stops at the stylesheet
    // and the importer is left untouched.
    assert_eq!(event, ChangeEvent::Change { file: css.clone() });
}

#[tokio::test]
async fn test_deleting_a_dependency_purges_and_broadcasts_unlink() {
    let dir = TempDir::new().unwrap();
    let util = write_file(dir.path(), "util.js", "export const u = 1;\n");
    let main = write_file(dir.path(), "main.js", "import { u } from './util.js';\n");
    let context = start_context(dir.path()).await;

    context.module(&main).await;
    assert_eq!(context.cache().len(), 1);
    let (_id, mut rx) = context.clients().register();
    settle_watcher().await;

    std::fs::remove_file(&util).unwrap();
    wait_for_event(&mut rx, |event| matches!(event, ChangeEvent::Unlink)).await;

    // The purge cascades through the dependents index before the unlink
    // message goes out, so the importer's entry is already gone.
    assert_eq!(context.cache().len(), 0);
}

#[tokio::test]
async fn test_instances_in_one_process_stay_isolated() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let main_a = write_file(dir_a.path(), "main.js", "export const which = 'a';\n");
    let main_b = write_file(dir_b.path(), "main.js", "export const which = 'b';\n");

    let context_a = start_context(dir_a.path()).await;
    let context_b = start_context(dir_b.path()).await;

    let served_a = context_a.module(&main_a).await;
    let served_b = context_b.module(&main_b).await;
    assert!(served_a.code.contains("'a'") || served_a.code.contains("\"a\""));
    assert!(served_b.code.contains("'b'") || served_b.code.contains("\"b\""));

    assert_eq!(context_a.cache().len(), 1);
    assert_eq!(context_b.cache().len(), 1);
    assert!(!context_a.graph().is_tracked(&main_b));
    assert!(!context_b.graph().is_tracked(&main_a));
}

#[tokio::test]
async fn test_shutdown_flushes_artifacts_for_the_next_instance() {
    let dir = TempDir::new().unwrap();
    let main = write_file(dir.path(), "main.js", "export const a = 1;\n");

    let first = start_context(dir.path()).await;
    let served = first.module(&main).await;
    first.shutdown().await;

    let second = start_context(dir.path()).await;
    assert_eq!(second.cache().len(), 1);
    let served_again = second.module(&main).await;
    assert_eq!(served_again.code, served.code);
}
