use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Write};
use std::os::unix::net::UnixStream as StdUnixStream;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::Signal;
use nix::sys::socket::{setsockopt, sockopt};
use nix::unistd::pipe;
use proptest::prelude::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::{sleep, timeout};

use ttyrelay::core::display::{Display, ModeSwitch, TerminalMode};
use ttyrelay::core::keymap::KeyMapper;
use ttyrelay::core::queue::ByteQueue;
use ttyrelay::core::relay::{encode_outbound, Relay, WATERMARK};
use ttyrelay::core::telnet::{Inbound, TelnetEngine, IAC};
use ttyrelay::domain::config::{ConnectionConfig, EnterKey, KeyConfig};
use ttyrelay::domain::error::{ConnectError, RelayError};
use ttyrelay::infrastructure::connection::{ConnectionManager, Connector, Link, LinkKind, TargetSpec};
use ttyrelay::infrastructure::nonblocking::AsyncFile;
use ttyrelay::infrastructure::process::EscalationPolicy;

/// Integration tests driving the whole relay through pipes and socket pairs
#[cfg(test)]
mod integration_tests {
    use super::*;

    #[derive(Clone, Default)]
    struct SharedSink(Rc<RefCell<Vec<u8>>>);

    impl SharedSink {
        fn contains(&self, needle: &[u8]) -> bool {
            self.0.borrow().windows(needle.len()).any(|w| w == needle)
        }
    }

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSwitch(Rc<RefCell<Vec<TerminalMode>>>);

    impl ModeSwitch for RecordingSwitch {
        fn apply(&mut self, mode: TerminalMode) -> io::Result<()> {
            self.0.borrow_mut().push(mode);
            Ok(())
        }
    }

    /// Hands out prepared socket ends, refusing once they run out.
    struct PairConnector {
        links: VecDeque<StdUnixStream>,
    }

    #[async_trait]
    impl Connector for PairConnector {
        async fn connect(&mut self, target: &TargetSpec) -> Result<Link, ConnectError> {
            match self.links.pop_front() {
                Some(stream) => Link::new(LinkKind::Network, stream.into(), target.to_string())
                    .map_err(ConnectError::Fatal),
                None => Err(ConnectError::Retryable(io::Error::from(
                    io::ErrorKind::ConnectionRefused,
                ))),
            }
        }
    }

    type TestRelay = Relay<SharedSink, RecordingSwitch, PairConnector>;

    struct Harness {
        relay: TestRelay,
        keys: File,
        sink: SharedSink,
        modes: RecordingSwitch,
    }

    fn harness(links: Vec<StdUnixStream>, reconnect: bool) -> Harness {
        let (read_end, write_end) = pipe().unwrap();
        let sink = SharedSink::default();
        let modes = RecordingSwitch::default();
        let config = ConnectionConfig {
            reconnect,
            retry_interval_ms: 10,
        };
        let connections = ConnectionManager::new(
            PairConnector { links: links.into() },
            "board:23".parse().unwrap(),
            &config,
        );
        let relay = Relay::new(
            AsyncFile::new(read_end).unwrap(),
            Display::new(sink.clone()),
            modes.clone(),
            connections,
        );
        Harness {
            relay,
            keys: File::from(write_end),
            sink,
            modes,
        }
    }

    fn peer(stream: StdUnixStream) -> UnixStream {
        stream.set_nonblocking(true).unwrap();
        UnixStream::from_std(stream).unwrap()
    }

    async fn wait_for(sink: &SharedSink, needle: &[u8]) {
        for _ in 0..500 {
            if sink.contains(needle) {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "console never showed {:?}, got {:?}",
            String::from_utf8_lossy(needle),
            String::from_utf8_lossy(&sink.0.borrow())
        );
    }

    /// Counts from the "Command received N and sent M bytes" summary.
    fn shell_counts(sink: &SharedSink) -> (u64, u64) {
        let text = String::from_utf8_lossy(&sink.0.borrow()).into_owned();
        let marker = "Command received ";
        let start = text.find(marker).expect("no shell summary") + marker.len();
        let mut words = text[start..].split_whitespace();
        let received = words.next().unwrap().parse().unwrap();
        assert_eq!(words.next(), Some("and"));
        assert_eq!(words.next(), Some("sent"));
        let sent = words.next().unwrap().parse().unwrap();
        (received, sent)
    }

    const LIMIT: Duration = Duration::from_secs(10);

    /// Bigger than a pipe and a socket buffer together.
    const FLOOD: usize = 1 << 20;

    /// DO SGA, WILL SGA, WILL TERMINAL-TYPE, DO ECHO
    const INITIAL_REQUESTS: [u8; 12] = [
        IAC, 253, 3, IAC, 251, 3, IAC, 251, 24, IAC, 253, 1,
    ];

    #[tokio::test]
    async fn test_keys_and_output_in_ascii_telnet() {
        let (ours, theirs) = StdUnixStream::pair().unwrap();
        let Harness {
            relay,
            mut keys,
            sink,
            modes,
        } = harness(vec![ours], false);
        let mut relay = relay.with_telnet(Some(TelnetEngine::new(false, None)), false);
        let mut target = peer(theirs);

        let driver = async {
            target.write_all(b"login: ").await.unwrap();
            keys.write_all(b"A\n").unwrap();

            let mut wire = [0u8; 3];
            target.read_exact(&mut wire).await.unwrap();
            assert_eq!(wire, [0x41, 0x0D, 0x00]);

            wait_for(&sink, b"login: ").await;
            keys.write_all(b"\x1cq\n").unwrap();
        };

        let (result, driven) = tokio::join!(timeout(LIMIT, relay.run()), timeout(LIMIT, driver));
        driven.unwrap();
        result.unwrap().unwrap();

        assert!(sink.contains(b"ttyrelay connected to board:23, escape character is 'CTRL-\\'."));
        assert!(sink.contains(b"ttyrelay board:23> "));
        let modes = modes.0.borrow();
        assert_eq!(modes.first(), Some(&TerminalMode::Raw));
        assert!(modes.contains(&TerminalMode::Warm));
        assert_eq!(modes.last(), Some(&TerminalMode::Cooked));
    }

    #[tokio::test]
    async fn test_target_loss_without_reconnect() {
        let (ours, theirs) = StdUnixStream::pair().unwrap();
        let Harness { mut relay, keys: _keys, .. } = harness(vec![ours], false);
        drop(theirs);

        let result = timeout(LIMIT, relay.run()).await.unwrap();
        assert!(matches!(
            result,
            Err(RelayError::ConnectionLost(ref name)) if name == "board:23"
        ));
        assert_eq!(result.unwrap_err().exit_code(), 1);
    }

    #[tokio::test]
    async fn test_reconnects_after_loss() {
        let (first_ours, first_theirs) = StdUnixStream::pair().unwrap();
        let (second_ours, second_theirs) = StdUnixStream::pair().unwrap();
        let Harness {
            mut relay,
            mut keys,
            sink,
            ..
        } = harness(vec![first_ours, second_ours], true);
        let mut second = peer(second_theirs);

        let driver = async {
            drop(first_theirs);
            wait_for(&sink, b"ttyrelay reconnecting to board:23...").await;

            keys.write_all(b"ok").unwrap();
            let mut wire = [0u8; 2];
            second.read_exact(&mut wire).await.unwrap();
            assert_eq!(&wire, b"ok");

            keys.write_all(b"\x1cq\n").unwrap();
        };

        let (result, driven) = tokio::join!(timeout(LIMIT, relay.run()), timeout(LIMIT, driver));
        driven.unwrap();
        result.unwrap().unwrap();
        assert!(sink.contains(b"ttyrelay lost connection to board:23"));
    }

    #[tokio::test]
    async fn test_menu_toggles_backspace() {
        let (ours, theirs) = StdUnixStream::pair().unwrap();
        let Harness {
            mut relay,
            mut keys,
            sink,
            ..
        } = harness(vec![ours], false);
        let mut target = peer(theirs);

        let driver = async {
            keys.write_all(b"\x1cb\n").unwrap();
            wait_for(&sink, b"Backspace key sends DEL").await;

            keys.write_all(b"\x08").unwrap();
            let mut wire = [0u8; 1];
            target.read_exact(&mut wire).await.unwrap();
            assert_eq!(wire, [0x7F]);

            keys.write_all(b"\x1czz\n").unwrap();
            wait_for(&sink, b"Invalid command: zz").await;
            keys.write_all(b"\x1cq\n").unwrap();
        };

        let (result, driven) = tokio::join!(timeout(LIMIT, relay.run()), timeout(LIMIT, driver));
        driven.unwrap();
        result.unwrap().unwrap();
        assert!(sink.contains(b"An empty line exits command mode."));
    }

    #[tokio::test]
    async fn test_shell_output_goes_to_target() {
        let (ours, theirs) = StdUnixStream::pair().unwrap();
        let Harness {
            mut relay,
            mut keys,
            sink,
            ..
        } = harness(vec![ours], false);
        let mut target = peer(theirs);

        let driver = async {
            keys.write_all(b"\x1c! printf hello\n").unwrap();

            let mut wire = [0u8; 5];
            target.read_exact(&mut wire).await.unwrap();
            assert_eq!(&wire, b"hello");

            wait_for(&sink, b"Command received 0 and sent 5 bytes, exit status 0").await;
            keys.write_all(b"\x1cq\n").unwrap();
        };

        let (result, driven) = tokio::join!(timeout(LIMIT, relay.run()), timeout(LIMIT, driver));
        driven.unwrap();
        result.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_target_feeds_shell_input() {
        let (ours, theirs) = StdUnixStream::pair().unwrap();
        let Harness {
            mut relay,
            mut keys,
            sink,
            ..
        } = harness(vec![ours], false);
        let mut target = peer(theirs);

        let driver = async {
            keys.write_all(b"\x1c! head -c 4\n").unwrap();
            wait_for(&sink, b"Running 'head -c 4'...").await;

            target.write_all(b"ping").await.unwrap();
            let mut wire = [0u8; 4];
            target.read_exact(&mut wire).await.unwrap();
            assert_eq!(&wire, b"ping");

            wait_for(&sink, b"Command received 4 and sent 4 bytes").await;
            keys.write_all(b"\x1cq\n").unwrap();
        };

        let (result, driven) = tokio::join!(timeout(LIMIT, relay.run()), timeout(LIMIT, driver));
        driven.unwrap();
        result.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cr_nul_enter_sends_one_nul_in_ascii_telnet() {
        let (ours, theirs) = StdUnixStream::pair().unwrap();
        let Harness { relay, mut keys, .. } = harness(vec![ours], false);
        let keymap = KeyMapper::new(&KeyConfig {
            enter: EnterKey::CrNul,
            ..KeyConfig::default()
        });
        let mut relay = relay
            .with_telnet(Some(TelnetEngine::new(false, None)), false)
            .with_keys(keymap);
        let mut target = peer(theirs);

        let driver = async {
            keys.write_all(b"\nA").unwrap();
            let mut wire = [0u8; 3];
            target.read_exact(&mut wire).await.unwrap();
            assert_eq!(wire, [0x0D, 0x00, 0x41]);
            keys.write_all(b"\x1cq\n").unwrap();
        };

        let (result, driven) = tokio::join!(timeout(LIMIT, relay.run()), timeout(LIMIT, driver));
        driven.unwrap();
        result.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_menu_timeout_resumes_relaying() {
        let (ours, theirs) = StdUnixStream::pair().unwrap();
        let Harness {
            relay,
            mut keys,
            sink,
            modes,
        } = harness(vec![ours], false);
        let mut relay = relay.with_menu_timeout(Duration::from_millis(50));
        let mut target = peer(theirs);

        let driver = async {
            keys.write_all(b"\x1c").unwrap();
            wait_for(&sink, b"ttyrelay board:23> ").await;
            sleep(Duration::from_millis(300)).await;

            // Only reaches the target once the menu gave up on its line.
            keys.write_all(b"z").unwrap();
            let mut wire = [0u8; 1];
            target.read_exact(&mut wire).await.unwrap();
            assert_eq!(&wire, b"z");

            keys.write_all(b"\x1cq\n").unwrap();
        };

        let (result, driven) = tokio::join!(timeout(LIMIT, relay.run()), timeout(LIMIT, driver));
        driven.unwrap();
        result.unwrap().unwrap();
        assert_eq!(
            *modes.0.borrow(),
            vec![
                TerminalMode::Raw,
                TerminalMode::Warm,
                TerminalMode::Raw,
                TerminalMode::Warm,
                TerminalMode::Raw,
                TerminalMode::Cooked,
            ]
        );
    }

    #[tokio::test]
    async fn test_abort_signals_running_command() {
        let (ours, _theirs) = StdUnixStream::pair().unwrap();
        let Harness {
            relay,
            mut keys,
            sink,
            ..
        } = harness(vec![ours], false);
        let mut relay = relay.with_policy(EscalationPolicy {
            grace: Duration::from_millis(10),
            steps: vec![(Signal::SIGTERM, Duration::from_secs(2))],
        });

        let driver = async {
            keys.write_all(b"\x1c! sleep 30\n").unwrap();
            wait_for(&sink, b"Running 'sleep 30'...").await;
            keys.write_all(b"\x1ck\n").unwrap();
            wait_for(&sink, b"killed by SIGTERM").await;
            keys.write_all(b"\x1cq\n").unwrap();
        };

        let (result, driven) = tokio::join!(timeout(LIMIT, relay.run()), timeout(LIMIT, driver));
        driven.unwrap();
        result.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_target_reads_pause_while_shell_input_backs_up() {
        let (ours, theirs) = StdUnixStream::pair().unwrap();
        let Harness {
            mut relay,
            mut keys,
            sink,
            ..
        } = harness(vec![ours], false);
        let mut target = peer(theirs);
        let flood = vec![b'a'; FLOOD];

        let driver = async {
            // The command never reads, so only the pipe and the queue fill.
            keys.write_all(b"\x1c! sleep 1\n").unwrap();
            wait_for(&sink, b"Running 'sleep 1'...").await;

            let (fed, counts) = tokio::join!(target.write_all(&flood), async {
                wait_for(&sink, b"Command received ").await;
                shell_counts(&sink)
            });
            // The rest of the flood is read once the command is gone.
            fed.unwrap();

            let (received, sent) = counts;
            assert!(received >= WATERMARK as u64, "received {}", received);
            assert!(received < (FLOOD / 2) as u64, "received {}", received);
            assert_eq!(sent, 0);

            keys.write_all(b"\x1cq\n").unwrap();
        };

        let (result, driven) = tokio::join!(timeout(LIMIT, relay.run()), timeout(LIMIT, driver));
        driven.unwrap();
        result.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shell_output_pauses_while_target_backs_up() {
        let (ours, theirs) = StdUnixStream::pair().unwrap();
        let Harness {
            mut relay,
            mut keys,
            sink,
            ..
        } = harness(vec![ours], false);
        let mut target = peer(theirs);

        let driver = async {
            keys.write_all(b"\x1c! head -c 1048576 /dev/zero; echo done >&2\n").unwrap();
            wait_for(&sink, b"Running 'head -c 1048576 /dev/zero; echo done >&2'...").await;

            // Nobody reads the target, so the command stays blocked on output.
            sleep(Duration::from_millis(500)).await;
            assert!(!sink.contains(b"| done"));

            let mut wire = vec![0xAAu8; FLOOD];
            target.read_exact(&mut wire).await.unwrap();
            assert!(wire.iter().all(|&b| b == 0));

            wait_for(&sink, b"| done").await;
            wait_for(&sink, b"Command received ").await;
            assert_eq!(shell_counts(&sink), (0, FLOOD as u64));

            keys.write_all(b"\x1cq\n").unwrap();
        };

        let (result, driven) = tokio::join!(timeout(LIMIT, relay.run()), timeout(LIMIT, driver));
        driven.unwrap();
        result.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_renegotiates_with_fresh_queue() {
        let (first_ours, first_theirs) = StdUnixStream::pair().unwrap();
        let (second_ours, second_theirs) = StdUnixStream::pair().unwrap();
        // Keeps most typed bytes queued while the first peer is not reading.
        setsockopt(&first_ours, sockopt::SndBuf, &4096).unwrap();
        let Harness {
            relay,
            mut keys,
            sink,
            ..
        } = harness(vec![first_ours, second_ours], true);
        let telnet = TelnetEngine::new(false, Some("vt100".to_string()));
        let mut relay = relay.with_telnet(Some(telnet), false);
        let mut first = peer(first_theirs);
        let mut second = peer(second_theirs);

        let driver = async {
            let mut requests = [0u8; 12];
            first.write_all(&[IAC, 253, 3]).await.unwrap();
            first.read_exact(&mut requests).await.unwrap();
            assert_eq!(requests, INITIAL_REQUESTS);

            keys.write_all(&[b'x'; 32 * 1024]).unwrap();
            sleep(Duration::from_millis(300)).await;
            drop(first);
            wait_for(&sink, b"ttyrelay reconnecting to board:23...").await;

            // Stale bytes would arrive ahead of the requests.
            second.write_all(&[IAC, 253, 3]).await.unwrap();
            second.read_exact(&mut requests).await.unwrap();
            assert_eq!(requests, INITIAL_REQUESTS);

            keys.write_all(b"ok").unwrap();
            let mut wire = [0u8; 2];
            second.read_exact(&mut wire).await.unwrap();
            assert_eq!(&wire, b"ok");

            keys.write_all(b"\x1cq\n").unwrap();
        };

        let (result, driven) = tokio::join!(timeout(LIMIT, relay.run()), timeout(LIMIT, driver));
        driven.unwrap();
        result.unwrap().unwrap();
        assert!(sink.contains(b"ttyrelay lost connection to board:23"));
    }

    #[test]
    fn test_enter_in_ascii_telnet_is_quoted() {
        let telnet = TelnetEngine::new(false, None);
        let mut queue = ByteQueue::new();

        encode_outbound(Some(&telnet), b"A\r", &mut queue);
        assert_eq!(queue.peek(), &[0x41, 0x0D, 0x00]);
    }

    proptest! {
        #[test]
        fn outbound_doubles_every_iac(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
            let telnet = TelnetEngine::new(true, None);
            let mut queue = ByteQueue::new();
            encode_outbound(Some(&telnet), &bytes, &mut queue);

            let iacs = bytes.iter().filter(|&&b| b == 0xFF).count();
            prop_assert_eq!(queue.len(), bytes.len() + iacs);
        }

        #[test]
        fn binary_data_without_iac_is_delivered(bytes in prop::collection::vec(0u8..0xFF, 0..512)) {
            let mut telnet = TelnetEngine::new(true, None);
            let mut replies = ByteQueue::new();

            let delivered: Vec<u8> = bytes
                .iter()
                .filter_map(|&b| match telnet.feed_inbound(b, &mut replies) {
                    Inbound::Deliver(byte) => Some(byte),
                    Inbound::Consumed => None,
                })
                .collect();

            prop_assert_eq!(delivered, bytes);
            prop_assert!(replies.is_empty());
        }
    }
}
