use std::{collections::VecDeque, io, net::SocketAddr, time::Duration};

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use thiserror::Error;
use thisslime::TracingError;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf},
    net::{TcpSocket, TcpStream},
    sync::mpsc,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_native_tls::{native_tls, TlsConnector, TlsStream};
use tracing::{debug, info, instrument, trace, warn};

use super::message::{self, Message};

/// How long to wait for the server to hang up after we send QUIT.
const QUIT_GRACE: Duration = Duration::from_secs(5);

/// Pause before reconnecting after a lost connection.
const RECONNECT_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Error, TracingError)]
pub enum Error {
    #[error("io error: {0}")]
    #[event(level = ERROR)]
    Io(#[from] io::Error),

    #[error("timed out connecting to {0}")]
    #[event(level = ERROR)]
    ConnectTimeout(String),

    #[error("couldn't resolve {0}")]
    #[event(level = ERROR)]
    Resolve(String),

    #[error("tls error: {0}")]
    #[event(level = ERROR)]
    Tls(#[from] native_tls::Error),

    #[error("nothing from the server for {0:?}")]
    #[event(level = WARN)]
    Idle(Duration),

    #[error("server closed the connection")]
    #[event(level = WARN)]
    Closed,

    #[error("server error: {0}")]
    #[event(level = ERROR)]
    Server(String),
}

/// What the client needs to know to get into the game channel.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub host: String,
    pub port: u16,
    pub nick: String,
    pub realname: String,
    pub user_modes: String,
    pub ident_pass: Option<String>,
    pub channel: String,
    pub connect_timeout: Duration,
    /// Give up on a connection that has been silent this long. Servers ping
    /// far more often.
    pub idle_timeout: Duration,
    pub line_rate: Duration,
    pub tls: bool,
    /// Local address to connect from.
    pub bind: Option<SocketAddr>,
}

impl ClientSettings {
    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn is_channel(&self, name: &str) -> bool {
        self.channel.eq_ignore_ascii_case(name)
    }
}

/// Things that happened on the server, narrowed down to the game channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Registered,
    /// We're in the game channel.
    Joined,
    /// A line of chat in the game channel, formatting removed.
    Message {
        nick: String,
        text: String,
    },
    Join {
        nick: String,
    },
    Part {
        nick: String,
    },
    Quit {
        nick: String,
    },
    Kick {
        nick: String,
    },
    Nick {
        old: String,
        new: String,
    },
    /// Mode change on the game channel; the modes and their arguments.
    Mode {
        args: Vec<String>,
    },
    /// One batch of a NAMES reply.
    Names(Vec<String>),
    /// The NAMES reply for the game channel is complete.
    NamesEnd,
    Disconnected,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Outbound {
    Line(Message),
    Quit(String),
}

/// Queues lines for the connection task. Lines sent while disconnected are
/// thrown away on reconnect.
#[derive(Debug, Clone)]
pub struct Sender {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl Sender {
    pub fn send(&self, message: Message) {
        if self.tx.send(Outbound::Line(message)).is_err() {
            warn!("connection task is gone, dropping line");
        }
    }

    /// Says goodbye and stops reconnecting.
    pub fn quit(&self, reason: impl Into<String>) {
        if self.tx.send(Outbound::Quit(reason.into())).is_err() {
            debug!("connection task already finished");
        }
    }

    /// A sender with no connection behind it, for watching what gets sent.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

pub struct Client;

impl Client {
    /// Starts the connection task. It keeps reconnecting until [`Sender::quit`]
    /// is called or the event receiver is dropped.
    pub fn spawn(
        settings: ClientSettings,
    ) -> (Sender, mpsc::UnboundedReceiver<Event>, JoinHandle<()>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(run(settings, out_rx, event_tx));

        (Sender { tx: out_tx }, event_rx, handle)
    }
}

enum Ended {
    Quit,
    Lost,
}

async fn run(
    settings: ClientSettings,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<Event>,
) {
    loop {
        let stream = match connect(&settings).await {
            Ok(stream) => stream,
            Err(err) => {
                err.trace();
                return;
            }
        };

        // whatever was queued was meant for the old connection
        while let Ok(stale) = outbound.try_recv() {
            if let Outbound::Quit(_) = stale {
                info!("quit requested while disconnected");
                return;
            }
        }

        let result = match stream {
            Stream::Plain(stream) => {
                Connection::new(stream, &settings, &events)
                    .run(&mut outbound)
                    .await
            }
            Stream::Tls(stream) => {
                Connection::new(*stream, &settings, &events)
                    .run(&mut outbound)
                    .await
            }
        };

        let ended = match result {
            Ok(ended) => ended,
            Err(err) => {
                err.trace();
                Ended::Lost
            }
        };

        match ended {
            Ended::Quit => {
                info!("disconnected");
                return;
            }
            Ended::Lost => {
                if events.send(Event::Disconnected).is_err() {
                    return;
                }

                warn!(delay = ?RECONNECT_DELAY, "connection lost, reconnecting");
                time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

fn reconnect_backoff() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_max_interval(Duration::from_secs(300))
        .with_max_elapsed_time(None)
        .build()
}

enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

#[instrument(skip_all, fields(address = %settings.address(), tls = settings.tls))]
async fn connect(settings: &ClientSettings) -> Result<Stream, Error> {
    let tls = if settings.tls {
        Some(TlsConnector::from(native_tls::TlsConnector::new()?))
    } else {
        None
    };

    let stream = backoff::future::retry_notify(
        reconnect_backoff(),
        || {
            let tls = tls.clone();

            async move {
                let attempt = async {
                    let tcp = open(settings).await?;

                    Ok::<_, Error>(match tls {
                        Some(tls) => Stream::Tls(Box::new(tls.connect(&settings.host, tcp).await?)),
                        None => Stream::Plain(tcp),
                    })
                };

                match time::timeout(settings.connect_timeout, attempt).await {
                    Ok(Ok(stream)) => Ok(stream),
                    Ok(Err(err)) => Err(backoff::Error::transient(err)),
                    Err(_) => Err(backoff::Error::transient(Error::ConnectTimeout(
                        settings.address(),
                    ))),
                }
            }
        },
        |err, wait| warn!(?wait, "{err}, retrying..."),
    )
    .await?;

    info!("connected");
    Ok(stream)
}

/// Opens the TCP connection, from `settings.bind` when one is configured.
async fn open(settings: &ClientSettings) -> Result<TcpStream, Error> {
    let address = settings.address();

    let Some(bind) = settings.bind else {
        return Ok(TcpStream::connect(&address).await?);
    };

    let remote = tokio::net::lookup_host(&address)
        .await?
        .find(|remote| remote.is_ipv4() == bind.is_ipv4())
        .ok_or_else(|| Error::Resolve(address.clone()))?;

    let socket = if bind.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };

    debug!(%bind, %remote, "binding local address");
    socket.bind(bind)?;

    Ok(socket.connect(remote).await?)
}

struct Connection<'a, S> {
    settings: &'a ClientSettings,
    events: &'a mpsc::UnboundedSender<Event>,
    reader: BufReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    queue: VecDeque<Message>,
    nick: String,
}

impl<'a, S: AsyncRead + AsyncWrite> Connection<'a, S> {
    fn new(
        stream: S,
        settings: &'a ClientSettings,
        events: &'a mpsc::UnboundedSender<Event>,
    ) -> Self {
        let (read, write) = tokio::io::split(stream);

        Self {
            settings,
            events,
            reader: BufReader::new(read),
            writer: write,
            queue: VecDeque::new(),
            nick: settings.nick.clone(),
        }
    }

    async fn run(&mut self, outbound: &mut mpsc::UnboundedReceiver<Outbound>) -> Result<Ended, Error> {
        let nick = Message::nick_change(&self.nick);
        let user = Message::user(&self.settings.nick, &self.settings.realname);
        self.write(&nick).await?;
        self.write(&user).await?;

        let mut pace = time::interval(self.settings.line_rate);
        pace.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let idle_timeout = self.settings.idle_timeout;
        let mut last_read = Instant::now();
        let mut buf = Vec::new();

        loop {
            tokio::select! {
                read = self.reader.read_until(b'\n', &mut buf) => {
                    if read? == 0 {
                        return Err(Error::Closed);
                    }

                    last_read = Instant::now();

                    let line = String::from_utf8_lossy(&buf).into_owned();
                    buf.clear();

                    if !self.receive(&line).await? {
                        return Ok(Ended::Quit);
                    }
                }
                next = outbound.recv() => match next {
                    Some(Outbound::Line(message)) => self.queue.push_back(message),
                    Some(Outbound::Quit(reason)) => {
                        self.quit(&reason).await?;
                        return Ok(Ended::Quit);
                    }
                    None => {
                        self.quit("").await?;
                        return Ok(Ended::Quit);
                    }
                },
                _ = pace.tick(), if !self.queue.is_empty() => {
                    if let Some(message) = self.queue.pop_front() {
                        self.write(&message).await?;
                    }
                }
                () = time::sleep_until(last_read + idle_timeout) => {
                    return Err(Error::Idle(idle_timeout));
                }
            }
        }
    }

    async fn write(&mut self, message: &Message) -> Result<(), Error> {
        if message.param(0).is_some_and(|to| to.eq_ignore_ascii_case("NickServ")) {
            trace!("-> PRIVMSG NickServ <hidden>");
        } else {
            trace!("-> {message}");
        }

        self.writer
            .write_all(format!("{message}\r\n").as_bytes())
            .await?;

        Ok(())
    }

    async fn quit(&mut self, reason: &str) -> Result<(), Error> {
        while let Some(message) = self.queue.pop_front() {
            self.write(&message).await?;
        }

        self.write(&Message::quit(reason)).await?;
        self.writer.flush().await?;

        // let the server close on us so the QUIT isn't lost
        let mut rest = Vec::new();
        let _ = time::timeout(QUIT_GRACE, async {
            while let Ok(read) = self.reader.read_until(b'\n', &mut rest).await {
                if read == 0 {
                    break;
                }
                rest.clear();
            }
        })
        .await;

        Ok(())
    }

    fn emit(&self, event: Event) -> bool {
        self.events.send(event).is_ok()
    }

    fn is_me(&self, nick: &str) -> bool {
        self.nick.eq_ignore_ascii_case(nick)
    }

    /// Handles one inbound line. Returns `false` once nobody is listening for
    /// events any more.
    async fn receive(&mut self, line: &str) -> Result<bool, Error> {
        let message: Message = match line.parse() {
            Ok(message) => message,
            Err(message::ParseError::Empty) => return Ok(true),
            Err(err) => {
                err.trace();
                return Ok(true);
            }
        };

        trace!("<- {}", line.trim_end());

        let nick = message.nick().unwrap_or_default().to_owned();

        let event = match message.command.as_str() {
            "PING" => {
                let token = message.trailing().unwrap_or_default().to_owned();
                self.write(&Message::pong(&token)).await?;
                None
            }
            "001" => {
                info!(nick = %self.nick, "registered");
                self.on_registered();
                Some(Event::Registered)
            }
            "433" => {
                self.nick.push('_');
                warn!(nick = %self.nick, "nick in use, trying another");
                let retry = Message::nick_change(&self.nick);
                self.write(&retry).await?;
                None
            }
            "353" => match (message.param(2), message.trailing()) {
                (Some(channel), Some(names)) if self.settings.is_channel(channel) => Some(
                    Event::Names(names.split_whitespace().map(str::to_owned).collect()),
                ),
                _ => None,
            },
            "366" => match message.param(1) {
                Some(channel) if self.settings.is_channel(channel) => Some(Event::NamesEnd),
                _ => None,
            },
            "JOIN" => {
                let channel = message.param(0).unwrap_or_default();

                if self.is_me(&nick) {
                    if self.settings.is_channel(channel) {
                        info!(channel, "joined");
                        Some(Event::Joined)
                    } else {
                        debug!(channel, "leaving channel that isn't ours");
                        self.queue.push_back(Message::part(channel));
                        None
                    }
                } else if self.settings.is_channel(channel) {
                    Some(Event::Join { nick })
                } else {
                    None
                }
            }
            "PART" => match message.param(0) {
                Some(channel) if self.settings.is_channel(channel) && !self.is_me(&nick) => {
                    Some(Event::Part { nick })
                }
                _ => None,
            },
            "QUIT" if !self.is_me(&nick) => Some(Event::Quit { nick }),
            "KICK" => match (message.param(0), message.param(1)) {
                (Some(channel), Some(kicked)) if self.settings.is_channel(channel) => {
                    if self.is_me(kicked) {
                        warn!(by = %nick, "kicked, rejoining");
                        self.queue.push_back(Message::join(channel));
                        None
                    } else {
                        Some(Event::Kick {
                            nick: kicked.to_owned(),
                        })
                    }
                }
                _ => None,
            },
            "NICK" => {
                let new = message.param(0).unwrap_or_default().to_owned();

                if self.is_me(&nick) {
                    self.nick = new;
                    None
                } else {
                    Some(Event::Nick { old: nick, new })
                }
            }
            "MODE" => match message.param(0) {
                Some(channel) if self.settings.is_channel(channel) => Some(Event::Mode {
                    args: message.params[1..].to_vec(),
                }),
                _ => None,
            },
            "PRIVMSG" => self.on_privmsg(&message, nick),
            "ERROR" => {
                let reason = message.trailing().unwrap_or_default().to_owned();
                return Err(Error::Server(reason));
            }
            _ => None,
        };

        Ok(match event {
            Some(event) => self.emit(event),
            None => true,
        })
    }

    fn on_registered(&mut self) {
        if let Some(pass) = &self.settings.ident_pass {
            self.queue
                .push_back(Message::privmsg("NickServ", &format!("IDENTIFY {pass}")));
        }

        if !self.settings.user_modes.is_empty() {
            self.queue
                .push_back(Message::user_mode(&self.nick, &self.settings.user_modes));
        }

        self.queue.push_back(Message::join(&self.settings.channel));
    }

    fn on_privmsg(&mut self, message: &Message, nick: String) -> Option<Event> {
        let target = message.param(0)?;
        let text = message.trailing()?;

        if let Some((query, _)) = message::ctcp(text) {
            self.on_ctcp(&query, &nick);
            return None;
        }

        if !self.settings.is_channel(target) {
            trace!(from = %nick, "ignoring private message");
            return None;
        }

        let text = message::strip_formatting(text).trim().to_owned();

        Some(Event::Message { nick, text })
    }

    fn on_ctcp(&mut self, query: &str, nick: &str) {
        let reply = match query {
            "ACTION" => return,
            "VERSION" => "CTCP VERSION: Trivia Bot!",
            "TIME" => "CTCP TIME: Trivia Time!",
            "PING" => "CTCP PING: Trivia Pong!",
            _ => "Unknown CTCP Query!",
        };

        debug!(query, nick, "ctcp");
        self.queue.push_back(Message::notice(nick, reply));
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::{tcp::OwnedReadHalf, TcpListener},
        time::timeout,
    };

    use super::{Client, ClientSettings, Event};
    use crate::irc::Message;

    const WAIT: Duration = Duration::from_secs(5);

    fn settings(port: u16) -> ClientSettings {
        ClientSettings {
            host: "127.0.0.1".to_owned(),
            port,
            nick: "TriviaBot".to_owned(),
            realname: "Trivia Bot".to_owned(),
            user_modes: "iB".to_owned(),
            ident_pass: None,
            channel: "#trivia".to_owned(),
            connect_timeout: WAIT,
            idle_timeout: WAIT,
            line_rate: Duration::from_millis(1),
            tls: false,
            bind: None,
        }
    }

    async fn expect_line(reader: &mut BufReader<OwnedReadHalf>, expected: &str) {
        let mut line = String::new();
        timeout(WAIT, reader.read_line(&mut line))
            .await
            .expect("client should send a line")
            .unwrap();

        assert_eq!(line.trim_end(), expected);
    }

    #[tokio::test]
    async fn session_with_fake_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let (sender, mut events, handle) = Client::spawn(settings(port));

        let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);

        expect_line(&mut reader, "NICK TriviaBot").await;
        expect_line(&mut reader, "USER TriviaBot 0 * :Trivia Bot").await;

        write
            .write_all(b":irc.test 433 * TriviaBot :Nickname is already in use\r\n")
            .await
            .unwrap();
        expect_line(&mut reader, "NICK TriviaBot_").await;

        write
            .write_all(b":irc.test 001 TriviaBot_ :Welcome\r\n")
            .await
            .unwrap();
        assert_eq!(events.recv().await, Some(Event::Registered));
        expect_line(&mut reader, "MODE TriviaBot_ +iB").await;
        expect_line(&mut reader, "JOIN #trivia").await;

        write
            .write_all(b":TriviaBot_!bot@host JOIN #trivia\r\n:irc.test 353 TriviaBot_ = #trivia :@admin +alice TriviaBot_\r\n:irc.test 366 TriviaBot_ #trivia :End of /NAMES list.\r\n")
            .await
            .unwrap();
        assert_eq!(events.recv().await, Some(Event::Joined));
        assert_eq!(
            events.recv().await,
            Some(Event::Names(vec![
                "@admin".to_owned(),
                "+alice".to_owned(),
                "TriviaBot_".to_owned(),
            ]))
        );
        assert_eq!(events.recv().await, Some(Event::NamesEnd));

        write.write_all(b"PING :abc123\r\n").await.unwrap();
        expect_line(&mut reader, "PONG abc123").await;

        write
            .write_all(b":alice!a@host PRIVMSG #trivia :\x02?start\x02\r\n")
            .await
            .unwrap();
        assert_eq!(
            events.recv().await,
            Some(Event::Message {
                nick: "alice".to_owned(),
                text: "?start".to_owned(),
            })
        );

        write
            .write_all(b":alice!a@host PRIVMSG TriviaBot_ :\x01VERSION\x01\r\n")
            .await
            .unwrap();
        expect_line(&mut reader, "NOTICE alice :CTCP VERSION: Trivia Bot!").await;

        write
            .write_all(b":op!o@host KICK #trivia TriviaBot_ :out\r\n")
            .await
            .unwrap();
        expect_line(&mut reader, "JOIN #trivia").await;

        sender.send(Message::privmsg("#trivia", "Thanks for playing trivia!"));
        expect_line(&mut reader, "PRIVMSG #trivia :Thanks for playing trivia!").await;

        sender.quit("see you");
        expect_line(&mut reader, "QUIT :see you").await;
        drop(write);
        drop(reader);

        timeout(WAIT, handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn other_channels_are_left() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let (sender, mut events, handle) = Client::spawn(settings(port));

        let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);

        expect_line(&mut reader, "NICK TriviaBot").await;
        expect_line(&mut reader, "USER TriviaBot 0 * :Trivia Bot").await;

        write
            .write_all(b":TriviaBot!bot@host JOIN #elsewhere\r\n:bob!b@host JOIN #trivia\r\n:bob!b@host NICK robert\r\n")
            .await
            .unwrap();

        expect_line(&mut reader, "PART #elsewhere").await;
        assert_eq!(
            events.recv().await,
            Some(Event::Join {
                nick: "bob".to_owned()
            })
        );
        assert_eq!(
            events.recv().await,
            Some(Event::Nick {
                old: "bob".to_owned(),
                new: "robert".to_owned(),
            })
        );

        sender.quit("bye");
        expect_line(&mut reader, "QUIT bye").await;
        drop(write);
        drop(reader);

        timeout(WAIT, handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn silence_is_noticed_while_sending() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let (sender, mut events, handle) = Client::spawn(ClientSettings {
            idle_timeout: Duration::from_millis(200),
            line_rate: Duration::from_millis(10),
            ..settings(port)
        });

        let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        let (read, _write) = stream.into_split();
        let mut reader = BufReader::new(read);

        expect_line(&mut reader, "NICK TriviaBot").await;
        expect_line(&mut reader, "USER TriviaBot 0 * :Trivia Bot").await;

        // enough queued chatter to keep writing well past the deadline
        for i in 0..1000 {
            sender.send(Message::privmsg("#trivia", &format!("line {i}")));
        }

        let drain = tokio::spawn(async move {
            let mut line = String::new();
            while reader.read_line(&mut line).await.unwrap_or(0) > 0 {
                line.clear();
            }
        });

        assert_eq!(
            timeout(Duration::from_secs(2), events.recv()).await.unwrap(),
            Some(Event::Disconnected)
        );

        handle.abort();
        drain.abort();
    }

    #[tokio::test]
    async fn connects_from_bind_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let (sender, _events, handle) = Client::spawn(ClientSettings {
            bind: Some("127.0.0.1:0".parse().unwrap()),
            ..settings(port)
        });

        let (stream, peer) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        assert_eq!(peer.ip().to_string(), "127.0.0.1");

        let (read, write) = stream.into_split();
        let mut reader = BufReader::new(read);
        expect_line(&mut reader, "NICK TriviaBot").await;
        expect_line(&mut reader, "USER TriviaBot 0 * :Trivia Bot").await;

        sender.quit("bye");
        expect_line(&mut reader, "QUIT bye").await;
        drop(write);
        drop(reader);

        timeout(WAIT, handle).await.unwrap().unwrap();
    }
}
