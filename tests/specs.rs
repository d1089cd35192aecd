// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end cluster scenarios: coordinator, workers, and client jobs on
//! real sockets, with short heartbeat and failover intervals.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use mangle::{job, ClientError, CoordinatorLink, JobSpec, Progress};
use mangle_coordinator::{Coordinator, Ctx, LogSink};
use mangle_core::{md5_hex, CoordinatorConfig, MediaKind, WorkerConfig};
use mangle_wire::{
    join_fields, markers, read_frame, write_frame, Frame, FrameType, FRAME_LEN, MAX_PAYLOAD,
};
use mangle_worker::{Cursor, CursorStore, Phase};

const HEARTBEAT: Duration = Duration::from_millis(150);
const GRACE: Duration = Duration::from_millis(700);

struct Cluster {
    ctx: Arc<Ctx>,
    client_addr: SocketAddr,
    worker_addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl Cluster {
    async fn start() -> Self {
        let cfg = CoordinatorConfig {
            client_ip: "127.0.0.1".to_string(),
            client_port: 0,
            worker_ip: "127.0.0.1".to_string(),
            worker_port: 0,
        };
        let ctx = Arc::new(Ctx::new(LogSink::disabled()).with_heartbeat_interval(HEARTBEAT));
        let coordinator = Coordinator::bind(&cfg, Arc::clone(&ctx)).await.unwrap();
        let client_addr = coordinator.client_addr().unwrap();
        let worker_addr = coordinator.worker_addr().unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(coordinator.run(shutdown.clone()));
        Self { ctx, client_addr, worker_addr, shutdown, handle }
    }

    async fn connect_client(&self, user: &str) -> CoordinatorLink {
        CoordinatorLink::connect(&self.client_addr.to_string(), user).await.unwrap()
    }

    async fn stop(self) {
        self.shutdown.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.handle).await;
    }
}

struct WorkerProc {
    serve_port: u16,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<(), mangle_worker::WorkerError>>,
}

impl WorkerProc {
    async fn stop(self) {
        self.shutdown.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.handle).await;
    }
}

async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn start_worker(cluster: &Cluster, kind: MediaKind, worker_dir: &Path) -> WorkerProc {
    let registered_before = cluster.ctx.workers.len();
    let cfg = WorkerConfig {
        coord_ip: cluster.worker_addr.ip().to_string(),
        coord_port: cluster.worker_addr.port(),
        serve_ip: "127.0.0.1".to_string(),
        serve_port: free_port().await,
        worker_dir: worker_dir.to_path_buf(),
        kind,
    };
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(mangle_worker::run(cfg.clone(), shutdown.clone()));

    wait_for(
        || cluster.ctx.workers.len() > registered_before,
        "worker never registered",
    )
    .await;
    WorkerProc { serve_port: cfg.serve_port, shutdown, handle }
}

async fn wait_for(mut condition: impl FnMut() -> bool, what: &str) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting: {what}");
}

fn spec_for(dir: &Path, filename: &str, factor: u32) -> JobSpec {
    let kind = MediaKind::from_path(Path::new(filename)).unwrap();
    let mut spec = JobSpec::new("u", dir, filename, kind, factor);
    spec.grace = GRACE;
    spec
}

#[tokio::test(flavor = "multi_thread")]
async fn happy_path_text_distortion() {
    let cluster = Cluster::start().await;
    let worker_dir = tempfile::tempdir().unwrap();
    let worker = start_worker(&cluster, MediaKind::Text, worker_dir.path()).await;

    let user_dir = tempfile::tempdir().unwrap();
    std::fs::write(user_dir.path().join("foo.txt"), "hello world\n").unwrap();

    let link = cluster.connect_client("u").await;
    let spec = spec_for(user_dir.path(), "foo.txt", 5);
    let progress = Progress::default();
    job::run(&link, &spec, &progress).await.unwrap();

    // Both words survive a factor of five; the mirror is byte-identical.
    assert_eq!(
        std::fs::read(user_dir.path().join("foo.txt_distorted")).unwrap(),
        b"hello world\n"
    );
    assert_eq!(progress.percent(), 100);
    // The worker staged the upload under its own directory.
    assert_eq!(
        std::fs::read(worker_dir.path().join("uploads/u/foo.txt")).unwrap(),
        b"hello world\n"
    );

    worker.stop().await;
    cluster.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn distortion_factor_filters_short_words() {
    let cluster = Cluster::start().await;
    let worker_dir = tempfile::tempdir().unwrap();
    let worker = start_worker(&cluster, MediaKind::Text, worker_dir.path()).await;

    let user_dir = tempfile::tempdir().unwrap();
    std::fs::write(user_dir.path().join("words.txt"), "a bb ccc dddd eeeee\n").unwrap();

    let link = cluster.connect_client("u").await;
    let spec = spec_for(user_dir.path(), "words.txt", 4);
    job::run(&link, &spec, &Progress::default()).await.unwrap();

    // Words shorter than the factor vanish; their separators remain.
    assert_eq!(
        std::fs::read(user_dir.path().join("words.txt_distorted")).unwrap(),
        b"   dddd eeeee\n"
    );

    worker.stop().await;
    cluster.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn media_distortion_runs_in_place() {
    let cluster = Cluster::start().await;
    let worker_dir = tempfile::tempdir().unwrap();
    let worker = start_worker(&cluster, MediaKind::Media, worker_dir.path()).await;

    let user_dir = tempfile::tempdir().unwrap();
    let content: Vec<u8> = (0u8..=255).cycle().take(1000).collect();
    std::fs::write(user_dir.path().join("tone.wav"), &content).unwrap();

    let link = cluster.connect_client("u").await;
    let spec = spec_for(user_dir.path(), "tone.wav", 4);
    job::run(&link, &spec, &Progress::default()).await.unwrap();

    let expected: Vec<u8> = content
        .iter()
        .enumerate()
        .filter(|(i, _)| (i + 1) % 4 != 0)
        .map(|(_, &b)| b)
        .collect();
    assert_eq!(
        std::fs::read(user_dir.path().join("tone.wav_distorted")).unwrap(),
        expected
    );

    worker.stop().await;
    cluster.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn no_workers_means_distort_ko() {
    let cluster = Cluster::start().await;
    let link = cluster.connect_client("u").await;

    let err = link.request_worker(MediaKind::Text, "foo.txt").await.unwrap_err();
    assert!(matches!(err, ClientError::NoWorker(MediaKind::Text)));

    // The job fails up front without ever opening a worker connection.
    let user_dir = tempfile::tempdir().unwrap();
    std::fs::write(user_dir.path().join("foo.txt"), "data\n").unwrap();
    let spec = spec_for(user_dir.path(), "foo.txt", 2);
    let err = job::run(&link, &spec, &Progress::default()).await.unwrap_err();
    assert!(matches!(err, ClientError::NoWorker(MediaKind::Text)));

    cluster.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn clean_disconnect_promotes_the_standby() {
    let cluster = Cluster::start().await;
    let dir1 = tempfile::tempdir().unwrap();
    let dir2 = tempfile::tempdir().unwrap();
    let w1 = start_worker(&cluster, MediaKind::Text, dir1.path()).await;
    let w2 = start_worker(&cluster, MediaKind::Text, dir2.path()).await;

    // Registration order decides the first election.
    assert_eq!(
        cluster.ctx.workers.principal(MediaKind::Text),
        Some(("127.0.0.1".to_string(), w1.serve_port))
    );

    // W1 announces its shutdown; the coordinator promotes W2 on its
    // existing link.
    w1.stop().await;
    let w2_port = w2.serve_port;
    wait_for(
        || {
            cluster.ctx.workers.principal(MediaKind::Text)
                == Some(("127.0.0.1".to_string(), w2_port))
        },
        "standby was never promoted",
    )
    .await;
    assert_eq!(cluster.ctx.workers.principal_count(MediaKind::Text), 1);

    // The next client query routes to W2.
    let link = cluster.connect_client("u").await;
    let (_, port) = link.request_worker(MediaKind::Text, "foo.txt").await.unwrap();
    assert_eq!(port, w2_port);

    w2.stop().await;
    cluster.stop().await;
}

/// A scripted worker that registers as principal, stages the upload through
/// the shared cursor store like a real worker would, then dies after
/// `chunks_before_death` acknowledged chunks.
async fn start_flaky_worker(
    cluster: &Cluster,
    worker_dir: PathBuf,
    chunks_before_death: usize,
) -> u16 {
    let mut upstream = TcpStream::connect(cluster.worker_addr).await.unwrap();
    let serve_port = free_port().await;
    let listener = TcpListener::bind(("127.0.0.1", serve_port)).await.unwrap();

    let hello = join_fields(&["Text", "127.0.0.1", &serve_port.to_string()]);
    write_frame(&mut upstream, &Frame::text(FrameType::WorkerConnect, &hello).unwrap())
        .await
        .unwrap();
    let reply = read_frame(&mut upstream).await.unwrap();
    assert_eq!(reply.frame_type, FrameType::PrincipalWorker);

    tokio::spawn(async move {
        let serve = async {
            let (mut stream, _) = listener.accept().await.unwrap();
            let store = CursorStore::open(worker_dir.join("state")).unwrap();

            let open = read_frame(&mut stream).await.unwrap();
            assert_eq!(open.frame_type, FrameType::StartDistort);
            let text = open.payload_text().into_owned();
            let fields: Vec<&str> = text.split('&').collect();
            let (user, file) = (fields[0].to_string(), fields[1].to_string());
            store.create(&file);
            write_frame(
                &mut stream,
                &Frame::text(FrameType::StartDistort, markers::OK).unwrap(),
            )
            .await
            .unwrap();

            let upload_dir = worker_dir.join("uploads").join(&user);
            std::fs::create_dir_all(&upload_dir).unwrap();
            let mut out = std::fs::File::create(upload_dir.join(&file)).unwrap();

            let mut cursor = Cursor { phase: Phase::Receiving, transferred: 0 };
            for _ in 0..chunks_before_death {
                let frame = read_frame(&mut stream).await.unwrap();
                assert_eq!(frame.frame_type, FrameType::FileData);
                std::io::Write::write_all(&mut out, &frame.payload).unwrap();
                write_frame(
                    &mut stream,
                    &Frame::text(FrameType::FileData, markers::OK).unwrap(),
                )
                .await
                .unwrap();
                cursor.transferred += frame.payload.len() as u64;
                store.update(&file, cursor);
            }
            std::io::Write::flush(&mut out).unwrap();
            // Die mid-upload: the link and the upstream drop together.
        };

        let heartbeats = async {
            loop {
                match read_frame(&mut upstream).await {
                    Ok(frame) if frame.frame_type == FrameType::Heartbeat => {
                        if write_frame(&mut upstream, &Frame::empty(FrameType::Heartbeat))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(_) => return,
                }
            }
        };

        tokio::select! {
            _ = serve => {}
            _ = heartbeats => {}
        }
    });

    serve_port
}

#[tokio::test(flavor = "multi_thread")]
async fn mid_upload_failover_resumes_on_the_standby() {
    let cluster = Cluster::start().await;

    // Both workers share the working directory, as co-located workers do.
    let shared = tempfile::tempdir().unwrap();
    let flaky_port =
        start_flaky_worker(&cluster, shared.path().to_path_buf(), 17).await;
    wait_for(|| cluster.ctx.workers.len() == 1, "flaky worker never registered").await;
    let standby = start_worker(&cluster, MediaKind::Text, shared.path()).await;

    assert_eq!(
        cluster.ctx.workers.principal(MediaKind::Text),
        Some(("127.0.0.1".to_string(), flaky_port))
    );

    // Ten kilobytes of digits: distortion is the identity at any factor.
    let user_dir = tempfile::tempdir().unwrap();
    let content: Vec<u8> = b"0123456789".iter().copied().cycle().take(10 * 1024).collect();
    std::fs::write(user_dir.path().join("data.txt"), &content).unwrap();

    let link = cluster.connect_client("u").await;
    let spec = spec_for(user_dir.path(), "data.txt", 3);
    let progress = Progress::default();
    job::run(&link, &spec, &progress).await.unwrap();

    // The full file made it across despite the mid-upload death, and the
    // distorted mirror passes its integrity check.
    assert_eq!(std::fs::read(user_dir.path().join("data.txt_distorted")).unwrap(), content);
    assert_eq!(std::fs::read(shared.path().join("uploads/u/data.txt")).unwrap(), content);
    assert_eq!(progress.percent(), 100);

    // The job finished on the promoted standby.
    assert_eq!(
        cluster.ctx.workers.principal(MediaKind::Text),
        Some(("127.0.0.1".to_string(), standby.serve_port))
    );

    standby.stop().await;
    cluster.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn resume_skips_bytes_already_received() {
    // Drive the client side by hand to observe the worker's cursor: after a
    // resume, the second upload starts where the acknowledgements stopped.
    let cluster = Cluster::start().await;
    let worker_dir = tempfile::tempdir().unwrap();
    let worker = start_worker(&cluster, MediaKind::Text, worker_dir.path()).await;

    let content: Vec<u8> = b"fourfour ".iter().copied().cycle().take(2000).collect();
    let md5 = {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), &content).unwrap();
        md5_hex(tmp.path()).unwrap()
    };
    let request = join_fields(&["u", "r.txt", &content.len().to_string(), &md5, "1"]);

    // First connection: four chunks, then hang up.
    let mut stream =
        TcpStream::connect(("127.0.0.1", worker.serve_port)).await.unwrap();
    write_frame(&mut stream, &Frame::text(FrameType::StartDistort, &request).unwrap())
        .await
        .unwrap();
    let reply = read_frame(&mut stream).await.unwrap();
    assert!(reply.payload_is(markers::OK));
    let sent = 4 * MAX_PAYLOAD;
    for chunk in content[..sent].chunks(MAX_PAYLOAD) {
        write_frame(
            &mut stream,
            &Frame::new(FrameType::FileData, chunk.to_vec()).unwrap(),
        )
        .await
        .unwrap();
        let ack = read_frame(&mut stream).await.unwrap();
        assert!(ack.payload_is(markers::OK));
    }
    drop(stream);

    // Second connection resumes: only the remaining bytes are uploaded.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut stream =
        TcpStream::connect(("127.0.0.1", worker.serve_port)).await.unwrap();
    write_frame(&mut stream, &Frame::text(FrameType::ResumeDistort, &request).unwrap())
        .await
        .unwrap();
    let reply = read_frame(&mut stream).await.unwrap();
    assert!(reply.payload_is(markers::OK));

    for chunk in content[sent..].chunks(MAX_PAYLOAD) {
        write_frame(
            &mut stream,
            &Frame::new(FrameType::FileData, chunk.to_vec()).unwrap(),
        )
        .await
        .unwrap();
        let ack = read_frame(&mut stream).await.unwrap();
        assert!(ack.payload_is(markers::OK));
    }

    // The upload digest matches: nothing was re-received or lost.
    let verdict = read_frame(&mut stream).await.unwrap();
    assert_eq!(verdict.frame_type, FrameType::EndDistort);
    assert!(verdict.payload_is(markers::CHECK_OK));

    worker.stop().await;
    cluster.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn corrupted_frame_closes_the_link() {
    let cluster = Cluster::start().await;

    let mut stream = TcpStream::connect(cluster.client_addr).await.unwrap();
    let mut bytes = Frame::text(FrameType::ClientConnect, "u&127.0.0.1&4000")
        .unwrap()
        .encode();
    bytes[5] ^= 0x01;
    stream.write_all(&bytes).await.unwrap();

    // The coordinator drops the link without replying.
    let mut reply = [0u8; FRAME_LEN];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0, "expected EOF after a corrupted frame");

    cluster.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn kinds_are_routed_independently() {
    let cluster = Cluster::start().await;
    let text_dir = tempfile::tempdir().unwrap();
    let media_dir = tempfile::tempdir().unwrap();
    let text_worker = start_worker(&cluster, MediaKind::Text, text_dir.path()).await;
    let media_worker = start_worker(&cluster, MediaKind::Media, media_dir.path()).await;

    let link = cluster.connect_client("u").await;
    let (_, text_port) = link.request_worker(MediaKind::Text, "a.txt").await.unwrap();
    let (_, media_port) = link.request_worker(MediaKind::Media, "a.wav").await.unwrap();
    assert_eq!(text_port, text_worker.serve_port);
    assert_eq!(media_port, media_worker.serve_port);

    text_worker.stop().await;
    media_worker.stop().await;
    cluster.stop().await;
}
