//! End-to-end behaviour of the task board and project session against an
//! in-memory server and mirror.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use opsync_core::mirror::{LocalMirror, MirrorKey};
use opsync_core::remote::memory::{FailureMode, Operation};
use opsync_core::storage::{MemoryBackend, MirrorBackend, StorageResult};
use opsync_core::{
    LoadOutcome, MemoryRemoteStore, MutationOutcome, ProjectAggregate, ProjectError,
    ProjectSession, RemoteStore, SyncCoordinator, Task, TaskBoard, TaskFilter, TaskStatus,
};

/// Memory backend that counts writes
#[derive(Default)]
struct CountingBackend {
    inner: MemoryBackend,
    writes: AtomicUsize,
}

impl CountingBackend {
    fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl MirrorBackend for CountingBackend {
    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.inner.read(key)
    }

    fn write(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write(key, value)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.inner.remove(key)
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        self.inner.keys()
    }
}

const TASKS_KEY: &str = "opsync:u1:tasks";

struct TaskEnv {
    remote: Arc<MemoryRemoteStore<Task>>,
    backend: Arc<CountingBackend>,
    board: TaskBoard,
}

impl TaskEnv {
    fn new(server: Vec<Task>) -> Self {
        let backend = Arc::new(CountingBackend::default());
        let remote = Arc::new(MemoryRemoteStore::with_records(server));
        Self {
            board: Self::board(&remote, &backend),
            remote,
            backend,
        }
    }

    fn board(remote: &Arc<MemoryRemoteStore<Task>>, backend: &Arc<CountingBackend>) -> TaskBoard {
        let coordinator = SyncCoordinator::new(
            remote.clone() as Arc<dyn RemoteStore<Task>>,
            Self::mirror_of(backend),
            Duration::from_millis(1500),
        );
        TaskBoard::new(coordinator)
    }

    fn mirror_of(backend: &Arc<CountingBackend>) -> LocalMirror<Task> {
        LocalMirror::new(
            backend.clone() as Arc<dyn MirrorBackend>,
            MirrorKey::new("u1", "tasks"),
        )
    }

    fn mirror(&self) -> LocalMirror<Task> {
        Self::mirror_of(&self.backend)
    }

    /// A fresh board over the same server and mirror, as after a restart
    fn restart(&self) -> TaskBoard {
        Self::board(&self.remote, &self.backend)
    }
}

fn task(id: &str, title: &str, status: TaskStatus) -> Task {
    let mut task = Task::with_id(id, title);
    task.status = status;
    task
}

#[tokio::test]
async fn offline_creates_each_land_in_mirror_once() {
    let env = TaskEnv::new(vec![]);
    env.board.load(&TaskFilter::default()).await;
    env.remote.fail(Operation::Create, FailureMode::Network);

    let first = env.board.create(Task::new("Call supplier")).await;
    let second = env.board.create(Task::new("Book courier")).await;
    assert_eq!(first.outcome, MutationOutcome::KeptLocally);
    assert_eq!(second.outcome, MutationOutcome::KeptLocally);
    assert_ne!(first.draft.id, second.draft.id);

    let mirrored = env.mirror().read();
    assert_eq!(mirrored.len(), 2);
    assert!(mirrored.iter().any(|t| t.id == first.draft.id));
    assert!(mirrored.iter().any(|t| t.id == second.draft.id));
}

#[tokio::test]
async fn offline_quick_add_scenario() {
    let env = TaskEnv::new(vec![]);
    env.remote.fail_all(FailureMode::Network);

    let outcome = env.board.load(&TaskFilter::default()).await;
    assert!(matches!(outcome, LoadOutcome::Offline { count: 0, .. }));

    let added = env.board.quick_add("Call supplier", "").await.unwrap();
    assert_eq!(added.outcome, MutationOutcome::KeptLocally);
    assert!(added.draft.is_local());
    assert!(env.board.is_offline());

    let visible = env.board.task(&added.draft.id).unwrap();
    assert_eq!(visible.title, "Call supplier");

    let mirrored = env.mirror().read();
    assert_eq!(mirrored.len(), 1);
    assert_eq!(mirrored[0].title, "Call supplier");
    assert_eq!(mirrored[0].status, TaskStatus::Todo);
}

#[tokio::test]
async fn strict_status_toggle_rolls_back_without_mirror_write() {
    let env = TaskEnv::new(vec![task("1", "Order steel", TaskStatus::Todo)]);
    env.board.load(&TaskFilter::default()).await;
    let writes_before = env.backend.writes();

    env.remote.fail(Operation::Update, FailureMode::Status(500));
    let outcome = env
        .board
        .set_status("1", TaskStatus::Completed, false)
        .await
        .unwrap();

    assert!(!outcome.is_applied());
    assert_eq!(env.board.task("1").unwrap().status, TaskStatus::Todo);
    assert_eq!(env.backend.writes(), writes_before);
}

#[tokio::test]
async fn offline_load_derives_stats_from_mirror() {
    let env = TaskEnv::new(vec![]);
    env.mirror().write(&[
        task("1", "a", TaskStatus::Todo),
        task("2", "b", TaskStatus::Todo),
        task("3", "c", TaskStatus::InProgress),
        task("4", "d", TaskStatus::Completed),
    ]);
    env.remote.fail(Operation::List, FailureMode::Network);

    let outcome = env.board.load(&TaskFilter::default()).await;
    assert!(matches!(outcome, LoadOutcome::Offline { count: 4, .. }));

    let stats = env.board.stats();
    assert_eq!(
        (stats.total, stats.todo, stats.in_progress, stats.completed),
        (4, 2, 1, 1)
    );
}

#[tokio::test]
async fn corrupt_mirror_reads_as_empty() {
    let env = TaskEnv::new(vec![]);
    env.backend.write(TASKS_KEY, b"{\"records\": [oops").unwrap();
    env.remote.fail(Operation::List, FailureMode::Network);

    let outcome = env.board.load(&TaskFilter::default()).await;
    assert!(matches!(outcome, LoadOutcome::Offline { count: 0, .. }));
    assert!(env.board.tasks().is_empty());
}

#[tokio::test]
async fn pending_work_survives_reload_and_push() {
    let env = TaskEnv::new(vec![task("1", "Order steel", TaskStatus::Todo)]);
    env.board.load(&TaskFilter::default()).await;

    env.remote.fail_all(FailureMode::Network);
    let added = env.board.quick_add("Call supplier", "").await.unwrap();
    env.board
        .set_status("1", TaskStatus::InProgress, true)
        .await
        .unwrap();
    assert_eq!(env.board.coordinator().pending().len(), 2);

    // Restart while the server is back: local work is overlaid on its list
    env.remote.heal();
    let board = env.restart();
    assert!(matches!(
        board.load(&TaskFilter::default()).await,
        LoadOutcome::Synced { count: 2 }
    ));
    assert!(board.task(&added.draft.id).is_some());
    assert_eq!(board.task("1").unwrap().status, TaskStatus::InProgress);
    assert_eq!(board.coordinator().pending().len(), 2);

    let report = board.coordinator().push_pending().await;
    assert_eq!(report.pushed, 2);
    assert_eq!(report.remaining, 0);
    assert!(report.stopped_by.is_none());

    let server = env.remote.records();
    assert_eq!(server.len(), 2);
    assert!(server.iter().any(|t| t.title == "Call supplier" && !t.is_local()));
    assert!(server
        .iter()
        .any(|t| t.id == "1" && t.status == TaskStatus::InProgress));
    assert!(env.mirror().read_snapshot().pending.is_empty());
}

#[tokio::test]
async fn task_added_offline_can_be_edited_once_back_online() {
    let env = TaskEnv::new(vec![task("1", "Order steel", TaskStatus::Todo)]);
    env.board.load(&TaskFilter::default()).await;

    env.remote.fail_all(FailureMode::Network);
    let added = env.board.quick_add("Call supplier", "").await.unwrap();
    let id = added.draft.id.clone();

    env.remote.heal();
    assert!(matches!(
        env.board.load(&TaskFilter::default()).await,
        LoadOutcome::Synced { count: 2 }
    ));

    let outcome = env
        .board
        .set_status(&id, TaskStatus::Completed, true)
        .await
        .unwrap();
    assert_eq!(outcome, MutationOutcome::KeptLocally);
    assert_eq!(env.board.task(&id).unwrap().status, TaskStatus::Completed);
    assert_eq!(env.remote.calls(Operation::Update), 0);

    let snapshot = env.mirror().read_snapshot();
    assert_eq!(snapshot.pending.len(), 1);
    assert!(snapshot.pending.contains(&id));
    assert!(snapshot
        .records
        .iter()
        .any(|t| t.id == id && t.status == TaskStatus::Completed));

    // Deleting it before it was ever sent leaves nothing to send
    assert_eq!(env.board.delete(&id).await.unwrap(), MutationOutcome::Committed);
    assert!(env.board.task(&id).is_none());
    assert!(env.mirror().read_snapshot().pending.is_empty());
    assert_eq!(env.remote.calls(Operation::Remove), 0);
    assert_eq!(env.remote.records().len(), 1);
}

#[tokio::test]
async fn missing_login_sends_nothing() {
    let env = TaskEnv::new(vec![task("1", "Order steel", TaskStatus::Todo)]);
    env.remote.set_authenticated(false);

    assert_eq!(env.board.load(&TaskFilter::default()).await, LoadOutcome::NotLoggedIn);
    let added = env.board.quick_add("Call supplier", "").await.unwrap();
    assert_eq!(added.outcome, MutationOutcome::NotLoggedIn);
    assert!(env.board.tasks().is_empty());
    assert_eq!(env.remote.total_calls(), 0);
    assert_eq!(env.backend.writes(), 0);
}

// ==================== Projects ====================

struct ProjectEnv {
    remote: Arc<MemoryRemoteStore<ProjectAggregate>>,
    session: ProjectSession,
}

fn project_env(project: ProjectAggregate) -> ProjectEnv {
    let remote = Arc::new(MemoryRemoteStore::with_records(vec![project]));
    let mirror = LocalMirror::new(
        Arc::new(MemoryBackend::new()) as Arc<dyn MirrorBackend>,
        MirrorKey::new("u1", "projects"),
    );
    let coordinator = SyncCoordinator::new(
        remote.clone() as Arc<dyn RemoteStore<ProjectAggregate>>,
        mirror,
        Duration::from_millis(1500),
    );
    ProjectEnv {
        remote,
        session: ProjectSession::new(coordinator, "p1"),
    }
}

#[tokio::test(start_paused = true)]
async fn project_edits_debounce_into_one_save_of_the_latest_state() {
    let env = project_env(ProjectAggregate::new("p1", "Fit-out"));
    env.session.load().await;

    for name in ["Design", "Build", "Handover"] {
        env.session.add_list(name, None, "").unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
    }
    assert_eq!(env.remote.calls(Operation::Update), 0);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(env.remote.calls(Operation::Update), 1);

    let saved = &env.remote.records()[0];
    let names: Vec<_> = saved.task_lists.iter().map(|l| l.name.as_str()).collect();
    assert_eq!(names, vec!["To Do", "Design", "Build", "Handover"]);
}

#[tokio::test(start_paused = true)]
async fn deleting_a_list_moves_tasks_to_first_remaining() {
    let mut project = ProjectAggregate::new("p1", "Fit-out");
    let doing = project.add_list("Doing", None, "").unwrap();
    let done = project.add_list("Done", None, "").unwrap();
    let env = project_env(project);
    env.session.load().await;

    let a = env.session.add_task(doing, "Order racking").unwrap();
    let b = env.session.add_task(doing, "Install lights").unwrap();
    env.session.add_subtask(&a, "Confirm sizes").unwrap();
    env.session.add_task(done, "Survey").unwrap();

    let (target, moved) = env.session.delete_list(doing).unwrap();
    assert_eq!((target, moved), (1, 2));

    let project = env.session.project().unwrap();
    assert!(project.orphaned_tasks().is_empty());
    assert_eq!(project.task(&a).unwrap().list_id, 1);
    assert_eq!(project.task(&b).unwrap().list_id, 1);

    env.session.flush().await;
    assert!(env.remote.records()[0].orphaned_tasks().is_empty());
}

#[tokio::test]
async fn only_list_cannot_be_deleted() {
    let env = project_env(ProjectAggregate::new("p1", "Fit-out"));
    env.session.load().await;

    assert_eq!(env.session.delete_list(1), Err(ProjectError::LastList));
    assert_eq!(env.session.project().unwrap().task_lists.len(), 1);
    assert!(!env.session.has_unsaved_changes());
}
