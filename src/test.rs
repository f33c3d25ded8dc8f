#[cfg(test)]
mod tests {
    use crate::engine::Engine;
    use crate::engine::context::RunnerContext;
    use crate::error::code;
    use crate::event;
    use crate::json::FlatJson;
    use crate::mailbox::Mail;
    use crate::net::epoll::AddOptions;
    use crate::net::socket;
    use crate::service::actor::ActorService;
    use crate::service::config::ConfigService;
    use crate::service::io_event_loop::IoEventLoopService;
    use crate::service::signal::{SignalService, interrupt_flag};
    use crate::service::socket_router::SocketRouterService;
    use crate::service::tcp_server::TcpServerService;
    use crate::service::{BoxedService, Service, ServiceKind, ServiceKindId};
    use crossbeam::channel::{Receiver, Sender, unbounded};
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::os::fd::RawFd;
    use std::sync::atomic::Ordering;
    use std::sync::{Arc, Mutex};
    use std::thread::{self, ThreadId};
    use std::time::{Duration, Instant};

    // ---- lifecycle probe: records create/destroy/event calls

    struct Probe {
        kind: ServiceKind,
        deps: Vec<ServiceKindId>,
        log: Arc<Mutex<Vec<String>>>,
        fail_create: bool,
    }

    impl Probe {
        fn boxed(
            kind: ServiceKind,
            deps: Vec<ServiceKindId>,
            log: Arc<Mutex<Vec<String>>>,
        ) -> BoxedService {
            Box::new(Self {
                kind,
                deps,
                log,
                fail_create: false,
            })
        }
    }

    impl Service for Probe {
        fn kind(&self) -> ServiceKind {
            self.kind
        }

        fn dependencies(&self) -> &[ServiceKindId] {
            &self.deps
        }

        fn on_create(&mut self, _ctx: &mut RunnerContext) -> crate::error::Result<()> {
            self.log
                .lock()
                .expect("probe log lock")
                .push(format!("create {}", self.kind.name));
            if self.fail_create {
                return Err(crate::error::Error::message(code::FAILED, "probe create failed"));
            }
            Ok(())
        }

        fn on_destroy(&mut self, _ctx: &mut RunnerContext) {
            self.log
                .lock()
                .expect("probe log lock")
                .push(format!("destroy {}", self.kind.name));
        }

        fn on_event(&mut self, _ctx: &mut RunnerContext, event: &str, _body: &FlatJson) {
            self.log
                .lock()
                .expect("probe log lock")
                .push(format!("event {event}"));
        }
    }

    // ---- cross-thread tap: forwards every event over a channel

    struct EventTap {
        tx: Sender<(String, FlatJson)>,
    }

    impl Service for EventTap {
        fn kind(&self) -> ServiceKind {
            ServiceKind::new(1100, "tap")
        }

        fn on_event(&mut self, _ctx: &mut RunnerContext, event: &str, body: &FlatJson) {
            let _ = self.tx.send((event.to_string(), body.clone()));
        }
    }

    fn wait_until(dur: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < dur {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    fn started_engine() -> Engine {
        let engine = Engine::new();
        engine.start().expect("engine start failed");
        engine
    }

    #[test]
    fn service_map_solves_dependency_order() {
        let engine = started_engine();
        let log = Arc::new(Mutex::new(Vec::new()));

        let (a, b, c) = (log.clone(), log.clone(), log.clone());
        let mut runner = engine
            .create_runner_builder("t")
            .expect("builder")
            .with_service(move || Ok(Probe::boxed(ServiceKind::new(10, "a"), vec![], a)))
            .with_service(move || Ok(Probe::boxed(ServiceKind::new(11, "b"), vec![10], b)))
            .with_service(move || Ok(Probe::boxed(ServiceKind::new(12, "c"), vec![11, 10], c)))
            .build_runner()
            .expect("build_runner failed");

        let ctx = runner.context_mut();
        ctx.invoke_create().expect("create failed");
        ctx.invoke_destroy();

        let entries = log.lock().expect("probe log lock");
        assert_eq!(
            *entries,
            vec![
                "create a", "create b", "create c", "destroy c", "destroy b", "destroy a",
            ]
        );
    }

    #[test]
    fn service_map_rejects_dependency_cycle() {
        let engine = started_engine();
        let log = Arc::new(Mutex::new(Vec::new()));

        let (a, b) = (log.clone(), log.clone());
        let err = engine
            .create_runner_builder("t")
            .expect("builder")
            .with_service(move || Ok(Probe::boxed(ServiceKind::new(10, "a"), vec![11], a)))
            .with_service(move || Ok(Probe::boxed(ServiceKind::new(11, "b"), vec![10], b)))
            .build_runner()
            .expect_err("cycle must fail the build");

        assert_eq!(err.code(), code::DEPENDENCY_CYCLE);
        assert!(log.lock().expect("probe log lock").is_empty());
    }

    #[test]
    fn service_map_rejects_missing_dependency() {
        let engine = started_engine();
        let log = Arc::new(Mutex::new(Vec::new()));

        let err = engine
            .create_runner_builder("t")
            .expect("builder")
            .with_service({
                let log = log.clone();
                move || Ok(Probe::boxed(ServiceKind::new(10, "a"), vec![99], log))
            })
            .build_runner()
            .expect_err("missing dependency must fail the build");

        assert_eq!(err.code(), code::MISSING_DEPENDENCY);
        assert!(log.lock().expect("probe log lock").is_empty());
    }

    #[test]
    fn service_map_rejects_duplicate_kind_id() {
        let engine = started_engine();
        let log = Arc::new(Mutex::new(Vec::new()));

        let (a, b) = (log.clone(), log.clone());
        let err = engine
            .create_runner_builder("t")
            .expect("builder")
            .with_service(move || Ok(Probe::boxed(ServiceKind::new(10, "a"), vec![], a)))
            .with_service(move || Ok(Probe::boxed(ServiceKind::new(10, "a2"), vec![], b)))
            .build_runner()
            .expect_err("duplicate kind id must fail the build");

        assert_eq!(err.code(), code::FAILED);
    }

    #[test]
    fn create_failure_rolls_back_created_prefix() {
        let engine = started_engine();
        let log = Arc::new(Mutex::new(Vec::new()));

        let (a, b) = (log.clone(), log.clone());
        let mut runner = engine
            .create_runner_builder("t")
            .expect("builder")
            .with_service(move || Ok(Probe::boxed(ServiceKind::new(10, "a"), vec![], a)))
            .with_service(move || {
                Ok(Box::new(Probe {
                    kind: ServiceKind::new(11, "b"),
                    deps: vec![10],
                    log: b,
                    fail_create: true,
                }) as BoxedService)
            })
            .build_runner()
            .expect("build_runner failed");

        let err = runner
            .context_mut()
            .invoke_create()
            .expect_err("create must surface the failure");
        assert_eq!(err.code(), code::FAILED);

        let entries = log.lock().expect("probe log lock");
        assert_eq!(*entries, vec!["create a", "create b", "destroy a"]);
    }

    #[test]
    fn actor_registry_register_deregister_round_trip() {
        let engine = started_engine();
        let actors = engine.actors();

        let _mailbox = actors.register("alpha", 8).expect("register failed");
        assert_eq!(actors.len(), 1);

        let err = actors.register("alpha", 8).expect_err("duplicate must fail");
        assert_eq!(err.code(), code::DUPLICATE_ACTOR);
        assert_eq!(actors.len(), 1);

        actors.deregister("alpha");
        actors.deregister("alpha");
        assert!(actors.is_empty());

        let err = actors
            .send(Mail::new("x", "alpha", "ping", FlatJson::new()))
            .expect_err("send to unknown actor must fail");
        assert_eq!(err.code(), code::ACTOR_NOT_FOUND);
    }

    #[test]
    fn mail_between_runners_preserves_pair_order() {
        let engine = started_engine();
        let (tx, rx): (Sender<(String, FlatJson)>, Receiver<(String, FlatJson)>) = unbounded();

        let runner = engine
            .create_runner_builder("match")
            .expect("builder")
            .with_service(|| Ok(Box::new(ActorService::new()) as BoxedService))
            .with_service(move || Ok(Box::new(EventTap { tx }) as BoxedService))
            .build_thread_runner()
            .expect("build_thread_runner failed");
        runner.start().expect("runner start failed");

        let actors = engine.actors();
        assert!(wait_until(Duration::from_secs(1), || actors.contains("match")));

        let _main_box = actors.register("main", 16).expect("register main failed");
        for n in 1..=3i64 {
            actors
                .send(Mail::new("main", "match", "ping", FlatJson::new().set("n", n)))
                .expect("send failed");
        }

        let mut seen = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(1);
        while seen.len() < 3 && Instant::now() < deadline {
            if let Ok((event, body)) = rx.recv_timeout(Duration::from_millis(100))
                && event == "ping"
            {
                assert_eq!(body.get_str(event::key::FROM), Some("main"));
                seen.push(body.get_i64("n").expect("ping body must carry n"));
            }
        }
        assert_eq!(seen, vec![1, 2, 3]);

        actors.deregister("main");
        engine.stop().expect("engine stop failed");
    }

    #[test]
    fn engine_stop_broadcasts_shutdown_and_joins_runners() {
        let engine = started_engine();
        let (tx_a, rx_a) = unbounded();
        let (tx_b, rx_b) = unbounded();

        for (name, tx) in [("alpha", tx_a), ("beta", tx_b)] {
            let runner = engine
                .create_runner_builder(name)
                .expect("builder")
                .with_service(|| Ok(Box::new(ActorService::new()) as BoxedService))
                .with_service(move || Ok(Box::new(EventTap { tx }) as BoxedService))
                .build_thread_runner()
                .expect("build_thread_runner failed");
            runner.start().expect("runner start failed");
        }

        let actors = engine.actors();
        assert!(wait_until(Duration::from_secs(1), || {
            actors.contains("alpha") && actors.contains("beta")
        }));

        engine.stop().expect("engine stop failed");

        for rx in [rx_a, rx_b] {
            let events: Vec<String> = rx.try_iter().map(|(event, _)| event).collect();
            assert!(
                events.iter().any(|e| e == event::SHUTDOWN),
                "runner never observed shutdown: {events:?}"
            );
        }
        assert!(actors.is_empty());
    }

    #[test]
    fn engine_rejects_builders_unless_running() {
        let engine = Engine::new();
        let err = engine.create_runner_builder("t").expect_err("not started yet");
        assert_eq!(err.code(), code::ENGINE_NOT_RUNNING);

        engine.start().expect("engine start failed");
        engine.stop().expect("engine stop failed");

        let err = engine.create_runner_builder("t").expect_err("already stopped");
        assert_eq!(err.code(), code::ENGINE_NOT_RUNNING);
    }

    #[test]
    fn signal_service_broadcasts_shutdown_exactly_once() {
        let engine = started_engine();
        let mut runner = engine
            .create_runner_builder("main")
            .expect("builder")
            .with_service(|| Ok(Box::new(ActorService::new()) as BoxedService))
            .with_service(|| Ok(Box::new(SignalService::new()) as BoxedService))
            .build_runner()
            .expect("build_runner failed");

        let observer = engine.actors().register("obs", 8).expect("register obs failed");

        let ctx = runner.context_mut();
        ctx.invoke_create().expect("create failed");
        assert!(!ctx
            .with_service::<SignalService, _>(|s, _| s.is_interrupted())
            .expect("signal service present"));

        interrupt_flag().store(true, Ordering::Relaxed);
        ctx.invoke_update();
        ctx.invoke_update();

        let mails = observer.receiver.drain(16);
        assert_eq!(mails.len(), 1, "shutdown must be announced exactly once");
        assert_eq!(mails[0].event, event::SHUTDOWN);
        assert_eq!(mails[0].from, "main");

        ctx.invoke_destroy();
        interrupt_flag().store(false, Ordering::Relaxed);
        engine.actors().deregister("obs");
    }

    #[test]
    fn shutdown_event_interrupts_runner_without_signal_service() {
        let engine = started_engine();
        let runner = engine
            .create_runner_builder("worker")
            .expect("builder")
            .with_service(|| Ok(Box::new(ActorService::new()) as BoxedService))
            .build_thread_runner()
            .expect("build_thread_runner failed");
        runner.start().expect("runner start failed");

        let actors = engine.actors();
        assert!(wait_until(Duration::from_secs(1), || actors.contains("worker")));

        actors
            .send(Mail::new("test", "worker", event::SHUTDOWN, FlatJson::new()))
            .expect("send failed");
        runner.stop().expect("runner join failed");

        let err = runner.stop().expect_err("second stop must fail");
        assert_eq!(err.code(), code::NOT_RUNNING);

        engine.stop().expect("engine stop failed");
    }

    // ---- io event loop over a local socketpair

    fn socketpair_nonblocking() -> (RawFd, RawFd) {
        let mut fds = [0 as libc::c_int; 2];
        let rc = unsafe {
            libc::socketpair(
                libc::AF_UNIX,
                libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                0,
                fds.as_mut_ptr(),
            )
        };
        assert_eq!(rc, 0, "socketpair failed");
        (fds[0], fds[1])
    }

    #[test]
    fn io_event_loop_emits_read_then_silences_removed_fds() {
        let engine = started_engine();
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut runner = engine
            .create_runner_builder("io")
            .expect("builder")
            .with_service(|| Ok(Box::new(IoEventLoopService::new()) as BoxedService))
            .with_service({
                let log = log.clone();
                move || Ok(Probe::boxed(ServiceKind::new(1200, "probe"), vec![], log))
            })
            .build_runner()
            .expect("build_runner failed");

        let ctx = runner.context_mut();
        ctx.invoke_create().expect("create failed");

        let (reader, writer) = socketpair_nonblocking();
        ctx.with_service::<IoEventLoopService, _>(|io, _| {
            io.add_fd(reader, AddOptions::edge_read())
        })
        .expect("io service present")
        .expect("add_fd failed");

        socket::send_all(writer, b"hello").expect("send failed");
        assert!(wait_until(Duration::from_secs(1), || {
            ctx.invoke_update();
            log.lock().expect("probe log lock").iter().any(|e| e == "event socket_read")
        }));

        let bytes = ctx
            .with_service::<IoEventLoopService, _>(|io, ctx| io.read_from_fd(ctx, reader))
            .expect("io service present")
            .expect("read_from_fd failed");
        assert_eq!(bytes, b"hello");

        // after remove_fd no further events may surface for this fd
        ctx.with_service::<IoEventLoopService, _>(|io, _| io.remove_fd(reader))
            .expect("io service present")
            .expect("remove_fd failed");
        log.lock().expect("probe log lock").clear();

        socket::send_all(writer, b"more").expect("send failed");
        for _ in 0..20 {
            ctx.invoke_update();
            thread::sleep(Duration::from_millis(1));
        }
        assert!(log.lock().expect("probe log lock").is_empty());

        socket::close_fd(reader);
        socket::close_fd(writer);
        ctx.invoke_destroy();
    }

    #[test]
    fn peer_close_raises_socket_close_once() {
        let engine = started_engine();
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut runner = engine
            .create_runner_builder("io")
            .expect("builder")
            .with_service(|| Ok(Box::new(IoEventLoopService::new()) as BoxedService))
            .with_service({
                let log = log.clone();
                move || Ok(Probe::boxed(ServiceKind::new(1200, "probe"), vec![], log))
            })
            .build_runner()
            .expect("build_runner failed");

        let ctx = runner.context_mut();
        ctx.invoke_create().expect("create failed");

        let (reader, writer) = socketpair_nonblocking();
        ctx.with_service::<IoEventLoopService, _>(|io, _| {
            io.add_fd(reader, AddOptions::edge_read())
        })
        .expect("io service present")
        .expect("add_fd failed");

        socket::close_fd(writer);
        assert!(wait_until(Duration::from_secs(1), || {
            ctx.invoke_update();
            log.lock().expect("probe log lock").iter().any(|e| e == "event socket_close")
        }));

        let closes = log
            .lock()
            .expect("probe log lock")
            .iter()
            .filter(|e| *e == "event socket_close")
            .count();
        assert_eq!(closes, 1);
        ctx.invoke_destroy();
    }

    // ---- socket handoff across runners

    #[derive(Debug)]
    enum MoverReport {
        Created(ThreadId),
        Read { thread: ThreadId, len: usize },
    }

    struct MoverService {
        tx: Sender<MoverReport>,
    }

    impl Service for MoverService {
        fn kind(&self) -> ServiceKind {
            ServiceKind::new(1300, "mover")
        }

        fn dependencies(&self) -> &[ServiceKindId] {
            const DEPS: &[ServiceKindId] = &[crate::service::kind::IO_EVENT_LOOP.id];
            DEPS
        }

        fn on_create(&mut self, _ctx: &mut RunnerContext) -> crate::error::Result<()> {
            let _ = self.tx.send(MoverReport::Created(thread::current().id()));
            Ok(())
        }

        fn on_event(&mut self, ctx: &mut RunnerContext, event_name: &str, body: &FlatJson) {
            match event_name {
                event::SOCKET_MOVE => {
                    let fd = body.get_u64(event::key::SOCKET_ID).expect("socket_move id") as RawFd;
                    ctx.with_service::<IoEventLoopService, _>(|io, _| {
                        io.add_fd(fd, AddOptions::edge_read())
                    })
                    .expect("io service present")
                    .expect("add_fd failed");
                }
                event::SOCKET_READ => {
                    let fd = body.get_u64(event::key::SOCKET_ID).expect("socket_read id") as RawFd;
                    let bytes = ctx
                        .with_service::<IoEventLoopService, _>(|io, ctx| io.read_from_fd(ctx, fd))
                        .expect("io service present")
                        .expect("read_from_fd failed");
                    let _ = self.tx.send(MoverReport::Read {
                        thread: thread::current().id(),
                        len: bytes.len(),
                    });
                }
                _ => {}
            }
        }
    }

    fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").expect("ephemeral bind failed");
        listener.local_addr().expect("local_addr failed").port()
    }

    #[test]
    fn socket_handoff_delivers_reads_on_destination_runner() {
        let engine = started_engine();
        let (tx, rx) = unbounded();
        let port = free_port();

        let worker = engine
            .create_runner_builder("worker")
            .expect("builder")
            .with_service(|| Ok(Box::new(ActorService::new()) as BoxedService))
            .with_service(|| Ok(Box::new(IoEventLoopService::new()) as BoxedService))
            .with_service(move || Ok(Box::new(MoverService { tx }) as BoxedService))
            .build_thread_runner()
            .expect("build worker failed");
        worker.start().expect("worker start failed");

        let actors = engine.actors();
        assert!(wait_until(Duration::from_secs(1), || actors.contains("worker")));

        let gate = engine
            .create_runner_builder("gate")
            .expect("builder")
            .with_service(move || {
                Ok(Box::new(ConfigService::new(FlatJson::new().set("port", port)))
                    as BoxedService)
            })
            .with_service(|| Ok(Box::new(ActorService::new()) as BoxedService))
            .with_service(|| Ok(Box::new(IoEventLoopService::new()) as BoxedService))
            .with_service(|| Ok(Box::new(TcpServerService::new()) as BoxedService))
            .with_service(|| Ok(Box::new(SocketRouterService::new("worker")) as BoxedService))
            .build_thread_runner()
            .expect("build gate failed");
        gate.start().expect("gate start failed");
        assert!(wait_until(Duration::from_secs(1), || actors.contains("gate")));

        let worker_thread = match rx.recv_timeout(Duration::from_secs(1)) {
            Ok(MoverReport::Created(id)) => id,
            other => panic!("expected Created report, got {other:?}"),
        };

        let mut client = None;
        for _ in 0..100 {
            match TcpStream::connect(("127.0.0.1", port)) {
                Ok(stream) => {
                    client = Some(stream);
                    break;
                }
                Err(_) => thread::sleep(Duration::from_millis(10)),
            }
        }
        let mut client = client.expect("could not connect to tcp server");

        let payload = vec![0xabu8; 10 * 1024];
        client.write_all(&payload).expect("client write failed");
        client.flush().expect("client flush failed");

        let mut total = 0usize;
        let deadline = Instant::now() + Duration::from_secs(2);
        while total < payload.len() && Instant::now() < deadline {
            match rx.recv_timeout(Duration::from_millis(200)) {
                Ok(MoverReport::Read { thread, len }) => {
                    assert_eq!(thread, worker_thread, "read must happen on the worker thread");
                    total += len;
                }
                Ok(other) => panic!("unexpected report {other:?}"),
                Err(_) => {}
            }
        }
        assert_eq!(total, payload.len(), "all buffered bytes must be read");

        // nothing further without new data
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        drop(client);
        engine.stop().expect("engine stop failed");
    }

    #[test]
    fn error_chain_walks_causes_in_order() {
        let inner = crate::error::Error::message(code::SOCKET_CLOSED, "peer went away");
        let mid = crate::error::Error::propagate(inner);
        let outer = crate::error::Error::new(code::FAILED).because(mid);

        let codes: Vec<i32> = outer.chain().map(|e| e.code()).collect();
        assert_eq!(
            codes,
            vec![code::FAILED, code::PROPAGATED, code::SOCKET_CLOSED]
        );

        let rendered = outer.to_string();
        assert!(rendered.contains("failed"));
        assert!(rendered.contains("->"));
        assert!(rendered.contains("peer went away"));
    }

    #[test]
    fn bounded_mailbox_reports_full() {
        let mailbox = crate::mailbox::Mailbox::bounded(2);
        for n in 0..2 {
            mailbox
                .sender
                .try_send(Mail::new("a", "b", "e", FlatJson::new().set("n", n as i64)))
                .expect("push within capacity failed");
        }
        let err = mailbox
            .sender
            .try_send(Mail::new("a", "b", "e", FlatJson::new()))
            .expect_err("third push must fail");
        assert_eq!(err.reason, crate::error::SendFailReason::Full);

        let drained = mailbox.receiver.drain(16);
        let ns: Vec<i64> = drained.iter().map(|m| m.body.get_i64("n").unwrap()).collect();
        assert_eq!(ns, vec![0, 1]);
    }
}
