use actix::prelude::*;
use actix_web::{get, web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// A server-to-client event, delivered as tagged JSON over the socket.
/// Delivery is best-effort to currently-connected sessions only; clients
/// that miss one recover through the pull endpoints.
#[derive(Clone, Debug, Serialize, Message)]
#[rtype(result = "()")]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Event {
    UserConnected { text: String },
    UserDisconnected { text: String },
    ChatMessage { user: String, text: String },
    RefreshProposals,
    WalletUpdate { balance: f64, message: String },
    Notification { text: String },
}

/// Frames a client may send after connecting.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum ClientFrame {
    Join {
        #[serde(rename = "goalId")]
        goal_id: String,
        username: String,
    },
    Chat {
        text: String,
    },
    ProposalUpdate,
}

/// Pure room bookkeeping: which session ids sit in which group room.
/// Split out from the actor so membership rules are testable directly.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, HashSet<usize>>,
}

impl RoomRegistry {
    pub fn join(&mut self, goal_id: &str, session: usize) {
        self.rooms.entry(goal_id.to_string()).or_default().insert(session);
    }

    /// Drops the session from every room it joined.
    pub fn leave_all(&mut self, session: usize) {
        self.rooms.retain(|_, members| {
            members.remove(&session);
            !members.is_empty()
        });
    }

    pub fn members(&self, goal_id: &str) -> impl Iterator<Item = usize> + '_ {
        self.rooms.get(goal_id).into_iter().flatten().copied()
    }
}

/// Process-wide fan-out actor. Sessions register on connect; HTTP handlers
/// publish group-scoped events through its address.
pub struct RoomServer {
    sessions: HashMap<usize, Recipient<Event>>,
    registry: RoomRegistry,
    next_id: usize,
}

impl RoomServer {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            registry: RoomRegistry::default(),
            next_id: 0,
        }
    }

    fn broadcast(&self, goal_id: &str, event: &Event, skip: Option<usize>) {
        for id in self.registry.members(goal_id) {
            if Some(id) == skip {
                continue;
            }
            if let Some(addr) = self.sessions.get(&id) {
                addr.do_send(event.clone());
            }
        }
    }
}

impl Actor for RoomServer {
    type Context = Context<Self>;
}

#[derive(Message)]
#[rtype(usize)]
pub struct Connect {
    pub addr: Recipient<Event>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Disconnect {
    pub id: usize,
    pub goal_id: Option<String>,
    pub username: Option<String>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Join {
    pub id: usize,
    pub goal_id: String,
    pub username: String,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct ClientChat {
    pub goal_id: String,
    pub user: String,
    pub text: String,
}

/// Group-scoped event published from the HTTP side.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Publish {
    pub goal_id: String,
    pub event: Event,
}

impl Handler<Connect> for RoomServer {
    type Result = usize;

    fn handle(&mut self, msg: Connect, _: &mut Context<Self>) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        self.sessions.insert(id, msg.addr);
        id
    }
}

impl Handler<Disconnect> for RoomServer {
    type Result = ();

    fn handle(&mut self, msg: Disconnect, _: &mut Context<Self>) {
        self.sessions.remove(&msg.id);
        self.registry.leave_all(msg.id);
        if let (Some(goal_id), Some(username)) = (msg.goal_id, msg.username) {
            info!(%username, %goal_id, "left room");
            self.broadcast(
                &goal_id,
                &Event::UserDisconnected {
                    text: format!("{username} has left the chat."),
                },
                None,
            );
        }
    }
}

impl Handler<Join> for RoomServer {
    type Result = ();

    fn handle(&mut self, msg: Join, _: &mut Context<Self>) {
        self.registry.join(&msg.goal_id, msg.id);
        info!(username = %msg.username, goal_id = %msg.goal_id, "joined room");
        // Announce to the rest of the room, not back to the joiner.
        self.broadcast(
            &msg.goal_id,
            &Event::UserConnected {
                text: format!("{} has joined the chat.", msg.username),
            },
            Some(msg.id),
        );
    }
}

impl Handler<ClientChat> for RoomServer {
    type Result = ();

    fn handle(&mut self, msg: ClientChat, _: &mut Context<Self>) {
        self.broadcast(
            &msg.goal_id,
            &Event::ChatMessage {
                user: msg.user,
                text: msg.text,
            },
            None,
        );
    }
}

impl Handler<Publish> for RoomServer {
    type Result = ();

    fn handle(&mut self, msg: Publish, _: &mut Context<Self>) {
        self.broadcast(&msg.goal_id, &msg.event, None);
    }
}

/// One connected WebSocket. Tracks which room it joined and relays frames
/// to the room server; evicts the client when heartbeats stop.
pub struct RoomSession {
    id: usize,
    hb: Instant,
    goal_id: Option<String>,
    username: Option<String>,
    server: Addr<RoomServer>,
}

impl RoomSession {
    pub fn new(server: Addr<RoomServer>) -> Self {
        Self {
            id: 0,
            hb: Instant::now(),
            goal_id: None,
            username: None,
            server,
        }
    }

    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                warn!(session = act.id, "client heartbeat timed out");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn handle_frame(&mut self, text: &str) {
        let frame = match serde_json::from_str::<ClientFrame>(text) {
            Ok(frame) => frame,
            Err(_) => return, // ignore unknown frames, as the source does
        };
        match frame {
            ClientFrame::Join { goal_id, username } => {
                if goal_id.is_empty() || username.is_empty() {
                    return;
                }
                self.goal_id = Some(goal_id.clone());
                self.username = Some(username.clone());
                self.server.do_send(Join {
                    id: self.id,
                    goal_id,
                    username,
                });
            }
            ClientFrame::Chat { text } => {
                if let (Some(goal_id), Some(user)) = (&self.goal_id, &self.username) {
                    self.server.do_send(ClientChat {
                        goal_id: goal_id.clone(),
                        user: user.clone(),
                        text,
                    });
                }
            }
            ClientFrame::ProposalUpdate => {
                if let Some(goal_id) = &self.goal_id {
                    self.server.do_send(Publish {
                        goal_id: goal_id.clone(),
                        event: Event::RefreshProposals,
                    });
                }
            }
        }
    }
}

impl Actor for RoomSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.heartbeat(ctx);
        let addr = ctx.address();
        self.server
            .send(Connect {
                addr: addr.recipient(),
            })
            .into_actor(self)
            .then(|res, act, ctx| {
                match res {
                    Ok(id) => act.id = id,
                    Err(_) => ctx.stop(),
                }
                fut::ready(())
            })
            .wait(ctx);
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        self.server.do_send(Disconnect {
            id: self.id,
            goal_id: self.goal_id.clone(),
            username: self.username.clone(),
        });
        Running::Stop
    }
}

impl Handler<Event> for RoomSession {
    type Result = ();

    fn handle(&mut self, event: Event, ctx: &mut Self::Context) {
        match serde_json::to_string(&event) {
            Ok(json) => ctx.text(json),
            Err(err) => warn!(%err, "failed to serialize event"),
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RoomSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(bytes)) => {
                self.hb = Instant::now();
                ctx.pong(&bytes);
            }
            Ok(ws::Message::Pong(_)) => self.hb = Instant::now(),
            Ok(ws::Message::Text(text)) => self.handle_frame(&text),
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => {}
            Err(_) => ctx.stop(),
        }
    }
}

#[get("/ws")]
pub async fn ws_entry(
    req: HttpRequest,
    stream: web::Payload,
    server: web::Data<Addr<RoomServer>>,
) -> Result<HttpResponse, actix_web::Error> {
    ws::start(RoomSession::new(server.get_ref().clone()), &req, stream)
}
