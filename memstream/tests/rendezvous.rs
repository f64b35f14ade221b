use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::StreamExt;
use futures::executor::block_on;
use memstream::{
    Address, AddressRegistry, DuplexChannel, Encoding, ErrorKind, ReadyState, RegistryConfig,
    ServerEvent, StreamEvent,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Endpoint on `address` that collects every accepted channel.
fn serve(registry: &AddressRegistry, address: &str) -> Rc<RefCell<Vec<DuplexChannel>>> {
    let accepted = Rc::new(RefCell::new(Vec::new()));
    let endpoint = registry.endpoint();
    {
        let accepted = accepted.clone();
        endpoint.on_connection(move |_, channel| accepted.borrow_mut().push(channel.clone()));
    }
    endpoint.listen(address).unwrap();
    accepted
}

fn collect_text(channel: &DuplexChannel) -> Rc<RefCell<Vec<String>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    channel.on_data(move |_, chunk| {
        sink.borrow_mut()
            .push(String::from_utf8_lossy(chunk.as_bytes()).into_owned());
    });
    seen
}

fn count_closes(channel: &DuplexChannel) -> Rc<RefCell<Vec<bool>>> {
    let closes = Rc::new(RefCell::new(Vec::new()));
    let sink = closes.clone();
    channel.on_close(move |_, had_error| sink.borrow_mut().push(had_error));
    closes
}

#[test]
fn connect_to_unbound_address_fails_asynchronously() {
    init_logger();
    let registry = AddressRegistry::new();
    let client = registry.channel();
    let events = client.events();

    client.connect("nowhere").unwrap();
    registry.run_until_idle();
    drop(client);

    let events: Vec<StreamEvent> = block_on(events.collect());
    assert_eq!(events.len(), 2);
    match &events[0] {
        StreamEvent::Error(err) => assert_eq!(err.kind(), ErrorKind::AddressNotFound),
        other => panic!("expected an error first, got {other:?}"),
    }
    assert_eq!(events[1], StreamEvent::Close { had_error: true });
}

#[test]
fn linked_channels_reference_each_other() {
    init_logger();
    let registry = AddressRegistry::new();
    let accepted = serve(&registry, "svc");

    let clients: Vec<_> = (0..3)
        .map(|_| registry.connect("svc").unwrap())
        .collect();
    registry.run_until_idle();

    let accepted = accepted.borrow();
    assert_eq!(accepted.len(), 3);
    for (client, server) in clients.iter().zip(accepted.iter()) {
        assert_eq!(client.peer().as_ref(), Some(server));
        assert_eq!(server.peer().as_ref(), Some(client));
        assert_eq!(client.ready_state(), ReadyState::Open);
        assert_eq!(server.ready_state(), ReadyState::Open);
    }
    assert_eq!(registry.link_count(&Address::from("svc")), 3);
}

#[test]
fn ping_pong_then_destroy() {
    init_logger();
    let registry = AddressRegistry::new();
    let endpoint = registry.endpoint();
    let server_seen = Rc::new(RefCell::new(Vec::new()));
    let server_closes = Rc::new(RefCell::new(Vec::new()));
    {
        let (server_seen, server_closes) = (server_seen.clone(), server_closes.clone());
        endpoint.on_connection(move |_, channel| {
            channel.set_encoding(Encoding::Utf8);
            let seen = server_seen.clone();
            channel.on_data(move |channel, chunk| {
                seen.borrow_mut().push(chunk.clone());
                channel.write("pong").unwrap();
            });
            let closes = server_closes.clone();
            channel.on_close(move |_, had_error| closes.borrow_mut().push(had_error));
        });
    }
    endpoint.listen("svc").unwrap();

    let client = registry.channel();
    client.set_encoding(Encoding::Utf8);
    client.on_connect(|channel| {
        channel.write("ping").unwrap();
    });
    let client_seen = collect_text(&client);
    let client_closes = count_closes(&client);

    client.connect("svc").unwrap();
    registry.run_until_idle();

    assert_eq!(server_seen.borrow().len(), 1);
    assert_eq!(server_seen.borrow()[0].as_text(), Some("ping"));
    assert_eq!(*client_seen.borrow(), vec!["pong"]);

    client.destroy();
    registry.run_until_idle();
    assert_eq!(*client_closes.borrow(), vec![false]);
    assert_eq!(*server_closes.borrow(), vec![false]);
}

#[test]
fn pause_before_delivery_buffers_until_resume() {
    init_logger();
    let registry = AddressRegistry::new();
    let accepted = serve(&registry, "svc");
    let client = registry.connect("svc").unwrap();
    registry.run_until_idle();

    let server = accepted.borrow()[0].clone();
    server.pause();
    server.pause();
    assert!(server.is_paused());
    let seen = collect_text(&server);

    for unit in ["a", "b", "c"] {
        client.write(unit).unwrap();
    }
    registry.run_until_idle();
    assert!(seen.borrow().is_empty());
    assert_eq!(server.queued_inbound(), 3);

    server.resume();
    assert!(!server.is_paused());
    registry.run_until_idle();
    assert_eq!(*seen.borrow(), vec!["c", "b", "a"]);
    assert_eq!(server.queued_inbound(), 0);

    // Once drained, deliveries flow straight through again
    client.write("d").unwrap();
    registry.run_until_idle();
    assert_eq!(seen.borrow().last().map(String::as_str), Some("d"));
}

#[test]
fn pause_inside_data_listener_holds_backlog() {
    init_logger();
    let registry = AddressRegistry::new();
    let accepted = serve(&registry, "svc");
    let client = registry.connect("svc").unwrap();
    registry.run_until_idle();

    let server = accepted.borrow()[0].clone();
    server.pause();
    let seen = collect_text(&server);
    let paused_once = Rc::new(Cell::new(false));
    {
        let paused_once = paused_once.clone();
        server.on_data(move |channel, _| {
            if !paused_once.replace(true) {
                channel.pause();
            }
        });
    }

    for unit in ["a", "b", "c"] {
        client.write(unit).unwrap();
    }
    registry.run_until_idle();

    server.resume();
    registry.run_until_idle();
    assert_eq!(*seen.borrow(), vec!["c"]);
    assert!(server.is_paused());
    assert_eq!(server.queued_inbound(), 2);

    server.resume();
    registry.run_until_idle();
    assert_eq!(*seen.borrow(), vec!["c", "b", "a"]);
}

#[test]
fn thousand_writes_survive_one_resume() {
    init_logger();
    let registry = AddressRegistry::new();
    let endpoint = registry.endpoint();
    let server_slot: Rc<RefCell<Option<DuplexChannel>>> = Rc::new(RefCell::new(None));
    let received = Rc::new(RefCell::new(Vec::new()));
    {
        let (server_slot, received) = (server_slot.clone(), received.clone());
        endpoint.on_connection(move |_, channel| {
            channel.pause();
            let received = received.clone();
            channel.on_data(move |_, chunk| {
                let text = String::from_utf8_lossy(chunk.as_bytes()).into_owned();
                received.borrow_mut().push(text.parse::<u32>().unwrap());
            });
            *server_slot.borrow_mut() = Some(channel.clone());
        });
    }
    endpoint.listen("bulk").unwrap();

    let client = registry.channel();
    client.on_connect(|channel| {
        for i in 0..1000u32 {
            assert!(channel.write(i.to_string()).unwrap());
        }
    });
    client.connect("bulk").unwrap();
    registry.run_until_idle();

    let server = server_slot.borrow().clone().unwrap();
    assert!(received.borrow().is_empty());
    assert_eq!(server.queued_inbound(), 1000);

    server.resume();
    registry.run_until_idle();

    let received = received.borrow();
    assert_eq!(received.len(), 1000);
    let expected: Vec<u32> = (0..1000).rev().collect();
    assert_eq!(*received, expected);
}

#[test]
fn close_endpoint_destroys_every_link_once() {
    init_logger();
    let registry = AddressRegistry::new();
    let endpoint = registry.endpoint();
    let accepted = Rc::new(RefCell::new(Vec::new()));
    {
        let accepted = accepted.clone();
        endpoint.on_connection(move |_, channel| {
            accepted.borrow_mut().push((channel.clone(), count_closes(channel)));
        });
    }
    endpoint.listen("svc").unwrap();

    let clients: Vec<_> = (0..4)
        .map(|_| {
            let client = registry.connect("svc").unwrap();
            let closes = count_closes(&client);
            (client, closes)
        })
        .collect();
    registry.run_until_idle();
    assert_eq!(accepted.borrow().len(), 4);

    endpoint.close().unwrap();
    assert!(!registry.is_bound(&Address::from("svc")));
    registry.run_until_idle();

    for (server, closes) in accepted.borrow().iter() {
        assert!(server.is_destroyed());
        assert_eq!(*closes.borrow(), vec![false]);
    }
    for (client, closes) in &clients {
        assert_eq!(client.ready_state(), ReadyState::Closed);
        assert_eq!(*closes.borrow(), vec![false]);
    }
}

#[test]
fn end_delivers_pending_writes_then_closes_write_half() {
    init_logger();
    let registry = AddressRegistry::new();
    let accepted = serve(&registry, "svc");
    let client = registry.connect("svc").unwrap();
    registry.run_until_idle();
    let server = accepted.borrow()[0].clone();
    let server_seen = collect_text(&server);
    let client_seen = collect_text(&client);

    client.write("one").unwrap();
    client.end_with("two").unwrap();
    assert_eq!(client.queued_outbound(), 1);

    // Still writable until the marker is processed; the write queues behind it
    assert!(client.is_writable());
    assert!(client.write("three").unwrap());
    assert_eq!(client.queued_outbound(), 2);

    registry.run_until_idle();
    assert_eq!(*server_seen.borrow(), vec!["one", "two", "three"]);
    assert_eq!(client.queued_outbound(), 0);
    assert!(!client.is_writable());
    assert_eq!(client.write("four").unwrap_err().kind(), ErrorKind::NotWritable);
    assert!(client.end().is_ok());
    assert!(client.is_readable());
    assert_eq!(client.ready_state(), ReadyState::Closed);

    // The read half stays open
    server.write("reply").unwrap();
    registry.run_until_idle();
    assert_eq!(*client_seen.borrow(), vec!["reply"]);
}

#[test]
fn write_without_connection_fails() {
    let registry = AddressRegistry::new();
    let channel = registry.channel();
    let err = channel.write("x").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotWritable);
}

#[test]
fn registries_are_independent() {
    let first = AddressRegistry::new();
    let second = AddressRegistry::new();
    let _accepted = serve(&first, "svc");

    assert!(first.is_bound(&Address::from("svc")));
    assert!(!second.is_bound(&Address::from("svc")));

    let stray = second.connect("svc").unwrap();
    second.run_until_idle();
    assert!(stray.is_destroyed());
}

#[test]
fn default_encoding_applies_to_text_writes() {
    init_logger();
    let registry =
        AddressRegistry::with_config(RegistryConfig::new().with_default_encoding(Encoding::Hex));
    let accepted = serve(&registry, "svc");
    let client = registry.connect("svc").unwrap();
    registry.run_until_idle();

    let server = accepted.borrow()[0].clone();
    let raw = Rc::new(RefCell::new(Vec::new()));
    {
        let raw = raw.clone();
        server.on_data(move |_, chunk| raw.borrow_mut().push(chunk.as_bytes().to_vec()));
    }

    client.write("cafe").unwrap();
    client.write_encoded("hi", Encoding::Utf8).unwrap();
    registry.run_until_idle();
    assert_eq!(*raw.borrow(), vec![vec![0xca, 0xfe], b"hi".to_vec()]);
}

#[test]
fn task_budget_bounds_a_runaway_echo() {
    init_logger();
    let registry = AddressRegistry::with_config(RegistryConfig::new().with_task_budget(50));
    let endpoint = registry.endpoint();
    endpoint.on_connection(|_, channel| {
        channel.on_data(|channel, chunk| {
            channel.write(chunk.as_bytes().to_vec()).unwrap();
        });
    });
    endpoint.listen("echo").unwrap();

    let client = registry.connect("echo").unwrap();
    client.on_connect(|channel| {
        channel.write("loop").unwrap();
    });
    client.on_data(|channel, chunk| {
        channel.write(chunk.as_bytes().to_vec()).unwrap();
    });

    assert_eq!(registry.run_until_idle(), 50);
    assert!(!registry.scheduler().is_idle());
}

#[test]
fn listen_on_taken_address_reports_error() {
    init_logger();
    let registry = AddressRegistry::new();
    let first = registry.endpoint();
    first.listen("svc").unwrap();

    let second = registry.endpoint();
    let mut events = second.events();
    second.listen("svc").unwrap();
    assert!(events.try_next().is_err());

    registry.run_until_idle();
    match events.try_next() {
        Ok(Some(ServerEvent::Error(err))) => assert_eq!(err.kind(), ErrorKind::AddressInUse),
        other => panic!("expected AddressInUse, got {other:?}"),
    }
    assert_eq!(
        second.listen("other").unwrap_err().kind(),
        ErrorKind::AlreadyListening
    );
}

#[test]
fn endpoint_closed_before_accept_fails_the_connect() {
    init_logger();
    let registry = AddressRegistry::new();
    let endpoint = registry.endpoint();
    let connections = Rc::new(Cell::new(0));
    {
        let connections = connections.clone();
        endpoint.on_connection(move |_, _| connections.set(connections.get() + 1));
    }
    endpoint.listen("svc").unwrap();

    let client = registry.connect("svc").unwrap();
    let mut events = client.events();
    endpoint.close().unwrap();
    registry.run_until_idle();

    assert_eq!(connections.get(), 0);
    match events.try_next() {
        Ok(Some(StreamEvent::Error(err))) => assert_eq!(err.kind(), ErrorKind::AddressNotFound),
        other => panic!("expected AddressNotFound, got {other:?}"),
    }
    assert_eq!(
        events.try_next().unwrap(),
        Some(StreamEvent::Close { had_error: true })
    );
    assert_eq!(client.ready_state(), ReadyState::Closed);
}
