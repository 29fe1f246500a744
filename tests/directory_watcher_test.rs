use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use fswatch_core::{ChangeKind, DirectoryWatcher, DirectoryWatcherOptions, EntryKind, WatchEvent};
use tempfile::TempDir;
use tokio::time::sleep;

struct TestFixture {
    _dir: TempDir,
    path: PathBuf,
}

fn setup() -> Result<TestFixture> {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
    let dir = TempDir::new()?;
    let path = dir.path().to_path_buf();
    Ok(TestFixture { _dir: dir, path })
}

/// Collect every event the watcher delivers within `window`, then stop.
/// 700ms comfortably clears one 200ms debounce cycle.
async fn collect_events(watcher: &mut DirectoryWatcher, window: Duration) -> Vec<WatchEvent> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        tokio::select! {
            maybe = watcher.events().recv() => {
                match maybe {
                    Some(e) => events.push(e),
                    None => break,
                }
            }
            _ = sleep(remaining) => break,
        }
    }
    events
}

fn kind_of(event: &WatchEvent) -> ChangeKind {
    match event {
        WatchEvent::Add(_) => ChangeKind::Add,
        WatchEvent::Remove(_) => ChangeKind::Remove,
        WatchEvent::Change(_) => ChangeKind::Change,
        WatchEvent::Error(_) => unreachable!("no error events expected"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn add_one_file_is_reported_with_size_and_kind() -> Result<()> {
    let fixture = setup()?;
    let mut watcher =
        DirectoryWatcher::new(fixture.path.clone(), DirectoryWatcherOptions::default()).await?;

    std::fs::write(fixture.path.join("hello.txt"), "Hello")?;

    let events = collect_events(&mut watcher, Duration::from_millis(700)).await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        WatchEvent::Add(e) => {
            assert_eq!(e.path, fixture.path.join("hello.txt"));
            assert_eq!(e.stat.kind, EntryKind::File);
            assert_eq!(e.stat.size, 5);
        }
        other => anyhow::bail!("expected Add, got {:?}", other),
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn add_one_directory_is_reported() -> Result<()> {
    let fixture = setup()?;
    let mut watcher =
        DirectoryWatcher::new(fixture.path.clone(), DirectoryWatcherOptions::default()).await?;

    std::fs::create_dir(fixture.path.join("hello"))?;

    let events = collect_events(&mut watcher, Duration::from_millis(700)).await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        WatchEvent::Add(e) => assert_eq!(e.stat.kind, EntryKind::Directory),
        other => anyhow::bail!("expected Add, got {:?}", other),
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn remove_file_carries_predeletion_metadata() -> Result<()> {
    let fixture = setup()?;
    std::fs::write(fixture.path.join("hello.txt"), "Hello")?;

    let mut watcher =
        DirectoryWatcher::new(fixture.path.clone(), DirectoryWatcherOptions::default()).await?;

    std::fs::remove_file(fixture.path.join("hello.txt"))?;

    let events = collect_events(&mut watcher, Duration::from_millis(700)).await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        WatchEvent::Remove(e) => {
            assert_eq!(e.stat.size, 5);
            assert_eq!(e.stat.kind, EntryKind::File);
        }
        other => anyhow::bail!("expected Remove, got {:?}", other),
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn change_file_reports_new_size() -> Result<()> {
    let fixture = setup()?;
    std::fs::write(fixture.path.join("hello.txt"), "Hello")?;

    let mut watcher =
        DirectoryWatcher::new(fixture.path.clone(), DirectoryWatcherOptions::default()).await?;

    std::fs::write(fixture.path.join("hello.txt"), "Hello, World!")?;

    let events = collect_events(&mut watcher, Duration::from_millis(700)).await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        WatchEvent::Change(e) => assert_eq!(e.stat.size, 13),
        other => anyhow::bail!("expected Change, got {:?}", other),
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn add_then_change_within_debounce_coalesces_to_single_add() -> Result<()> {
    let fixture = setup()?;
    let mut watcher =
        DirectoryWatcher::new(fixture.path.clone(), DirectoryWatcherOptions::default()).await?;

    let path = fixture.path.join("hello.txt");
    std::fs::write(&path, "Hello")?;
    std::fs::write(&path, "Hello, World!")?;

    let events = collect_events(&mut watcher, Duration::from_millis(700)).await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        WatchEvent::Add(e) => assert_eq!(e.stat.size, 13),
        other => anyhow::bail!("expected Add, got {:?}", other),
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn add_then_remove_within_debounce_produces_no_events() -> Result<()> {
    let fixture = setup()?;
    let mut watcher =
        DirectoryWatcher::new(fixture.path.clone(), DirectoryWatcherOptions::default()).await?;

    let path = fixture.path.join("hello.txt");
    std::fs::write(&path, "Hello")?;
    std::fs::remove_file(&path)?;

    let events = collect_events(&mut watcher, Duration::from_millis(700)).await;
    assert!(events.is_empty(), "expected no events, got {:?}", events);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn remove_then_add_within_debounce_becomes_single_change() -> Result<()> {
    let fixture = setup()?;
    let path = fixture.path.join("hello.txt");
    std::fs::write(&path, "Hello")?;

    let mut watcher =
        DirectoryWatcher::new(fixture.path.clone(), DirectoryWatcherOptions::default()).await?;

    std::fs::remove_file(&path)?;
    std::fs::write(&path, "Hello")?;

    let events = collect_events(&mut watcher, Duration::from_millis(700)).await;
    assert_eq!(events.len(), 1);
    assert_eq!(kind_of(&events[0]), ChangeKind::Change);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn polling_change_then_remove_carries_last_sampled_metadata() -> Result<()> {
    let fixture = setup()?;
    let path = fixture.path.join("hello.txt");
    std::fs::write(&path, "Hello")?;

    let options = DirectoryWatcherOptions {
        polling_interval: Some(Duration::from_millis(300)),
    };
    let mut watcher = DirectoryWatcher::new(fixture.path.clone(), options).await?;

    // Both mutations land inside the same polling interval.
    std::fs::write(&path, "Hello, World!")?;
    std::fs::remove_file(&path)?;

    let events = collect_events(&mut watcher, Duration::from_millis(900)).await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        WatchEvent::Remove(e) => assert_eq!(e.stat.size, 5),
        other => anyhow::bail!("expected Remove, got {:?}", other),
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn sibling_and_parent_changes_are_isolated() -> Result<()> {
    let fixture = setup()?;
    std::fs::create_dir(fixture.path.join("child"))?;

    let mut watcher =
        DirectoryWatcher::new(fixture.path.clone(), DirectoryWatcherOptions::default()).await?;

    // Drain the initial "child" directory isn't re-announced; this watcher
    // only reports changes after `ready`.
    std::fs::write(fixture.path.join("child").join("nested.txt"), "x")?;

    let events = collect_events(&mut watcher, Duration::from_millis(700)).await;
    assert!(
        events.is_empty(),
        "non-recursive watcher should not see grandchild changes: {:?}",
        events
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn nonexistent_target_rejects_with_not_found() {
    let missing = std::env::temp_dir().join("fswatch-core-test-does-not-exist-xyz");
    let result = DirectoryWatcher::new(missing, DirectoryWatcherOptions::default()).await;
    assert!(matches!(result, Err(fswatch_core::Error::NotFound(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn non_directory_target_rejects_with_not_a_directory() -> Result<()> {
    let fixture = setup()?;
    let file_path = fixture.path.join("plain.txt");
    std::fs::write(&file_path, "x")?;

    let result = DirectoryWatcher::new(file_path, DirectoryWatcherOptions::default()).await;
    assert!(matches!(result, Err(fswatch_core::Error::NotADirectory(_))));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn close_is_idempotent_and_stops_emission() -> Result<()> {
    let fixture = setup()?;
    let mut watcher =
        DirectoryWatcher::new(fixture.path.clone(), DirectoryWatcherOptions::default()).await?;

    watcher.close().await;
    watcher.close().await; // must not panic or hang

    std::fs::write(fixture.path.join("after-close.txt"), "x")?;
    let events = collect_events(&mut watcher, Duration::from_millis(400)).await;
    assert!(events.is_empty());
    Ok(())
}
