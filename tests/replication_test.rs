use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use wolfkv::database::Database;
use wolfkv::network::{NetworkServer, ServerOptions};
use wolfkv::replication::{Master, ReplicationNode, Slave};
use wolfkv::shutdown;
use wolfkv::storage::{Engine, Storage};
use wolfkv::wal::{segment, Wal, WalSettings};
use wolfkv::Error;

fn wal_settings(dir: &Path) -> WalSettings {
    WalSettings {
        max_segment_size: 10 * 1024 * 1024,
        flushing_batch_size: 100,
        flushing_batch_timeout: Duration::from_millis(5),
        data_directory: dir.to_path_buf(),
    }
}

struct MasterNode {
    database: Database,
    address: String,
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl MasterNode {
    async fn start(dir: &Path) -> Self {
        let (stop, shutdown) = shutdown::channel();
        let wal = Arc::new(Wal::new(wal_settings(dir)).unwrap());
        let wal_task = wal.start(shutdown.clone()).unwrap();
        let storage = Arc::new(Storage::new(Arc::new(Engine::new()), Some(wal)).unwrap());

        let server = NetworkServer::bind("127.0.0.1:0", ServerOptions::default())
            .await
            .unwrap();
        let address = server.local_addr().unwrap().to_string();
        let master = Master::new(address.clone(), dir);
        let master_task = tokio::spawn(async move {
            master.serve(server, shutdown).await.unwrap();
        });

        Self {
            database: Database::new(storage),
            address,
            stop,
            tasks: vec![wal_task, master_task],
        }
    }

    async fn stop(self) {
        self.stop.send(true).unwrap();
        for task in self.tasks {
            task.await.unwrap();
        }
    }
}

struct SlaveNode {
    database: Database,
    storage: Arc<Storage>,
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SlaveNode {
    fn start(dir: &Path, master_address: &str) -> Self {
        let (stop, shutdown) = shutdown::channel();
        let wal = Arc::new(Wal::new(wal_settings(dir)).unwrap());
        let wal_task = wal.start(shutdown.clone()).unwrap();
        let storage = Arc::new(Storage::new(Arc::new(Engine::new()), Some(wal)).unwrap());
        let apply_task = storage.start_replication_apply(shutdown.clone()).unwrap();

        let slave = Slave::new(
            master_address,
            dir,
            Duration::from_millis(20),
            storage.replication_stream(),
        );
        let slave_task = tokio::spawn(async move {
            slave.start(shutdown).await.unwrap();
        });

        Self {
            database: Database::new(Arc::clone(&storage)).read_only(true),
            storage,
            stop,
            tasks: vec![wal_task, apply_task, slave_task],
        }
    }

    async fn stop(self) {
        self.stop.send(true).unwrap();
        for task in self.tasks {
            task.await.unwrap();
        }
    }
}

/// Poll until `check` holds or the timeout expires
async fn wait_until(timeout: Duration, check: impl Fn() -> bool) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[tokio::test]
async fn test_slave_applies_master_segment_in_order() {
    let master_dir = TempDir::new().unwrap();
    let slave_dir = TempDir::new().unwrap();

    let master = MasterNode::start(master_dir.path()).await;
    assert_eq!(master.database.handle("SET a 1").await.unwrap(), "OK");
    assert_eq!(master.database.handle("DEL a").await.unwrap(), "OK");
    assert_eq!(master.database.handle("SET b 2").await.unwrap(), "OK");

    let slave = SlaveNode::start(slave_dir.path(), &master.address);
    let storage = Arc::clone(&slave.storage);
    assert!(wait_until(Duration::from_secs(5), || storage.get("b").as_deref() == Some("2")).await);

    assert!(matches!(slave.database.handle("GET a").await, Err(Error::NotFound)));
    assert_eq!(slave.database.handle("GET b").await.unwrap(), "2");
    assert!(matches!(
        slave.database.handle("SET c 3").await,
        Err(Error::ReadOnly)
    ));
    assert_eq!(
        segment::list_segments(slave_dir.path()).unwrap(),
        segment::list_segments(master_dir.path()).unwrap()
    );

    slave.stop().await;
    master.stop().await;
}

#[tokio::test]
async fn test_slave_follows_active_segment_and_resumes() {
    let master_dir = TempDir::new().unwrap();
    let slave_dir = TempDir::new().unwrap();

    let master = MasterNode::start(master_dir.path()).await;
    master.database.handle("SET x 1").await.unwrap();

    let slave = SlaveNode::start(slave_dir.path(), &master.address);
    let storage = Arc::clone(&slave.storage);
    assert!(wait_until(Duration::from_secs(5), || storage.get("x").is_some()).await);

    // Later writes land in the same, still active segment
    master.database.handle("SET y 2").await.unwrap();
    master.database.handle("SET x 3").await.unwrap();
    assert!(wait_until(Duration::from_secs(5), || storage.get("x").as_deref() == Some("3")).await);
    assert_eq!(storage.get("y"), Some("2".to_string()));
    slave.stop().await;

    // A restarted slave replays its saved segments and keeps polling
    master.database.handle("DEL y").await.unwrap();
    let slave = SlaveNode::start(slave_dir.path(), &master.address);
    assert_eq!(slave.storage.get("x"), Some("3".to_string()));
    let storage = Arc::clone(&slave.storage);
    assert!(wait_until(Duration::from_secs(5), || storage.get("y").is_none()).await);

    slave.stop().await;
    master.stop().await;
}

#[tokio::test]
async fn test_slave_waits_for_unavailable_master() {
    let slave_dir = TempDir::new().unwrap();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let slave = SlaveNode::start(slave_dir.path(), &address);
    sleep(Duration::from_millis(100)).await;

    assert!(slave.storage.engine().is_empty());
    assert!(segment::list_segments(slave_dir.path()).unwrap().is_empty());
    slave.stop().await;
}
