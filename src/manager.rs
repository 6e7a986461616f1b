//! Registry of nodes and players.
//!
//! Nodes do not own players. They reach the players bound to them, and the
//! consumers of their notifications, through the [`Manager`] they were
//! created with. [`NodeManager`] is the registry shipped with this crate:
//! it keeps nodes by identifier and players by guild id, and forwards every
//! notification to an unbounded channel.
//!
//! # Example
//!
//! ```rust
//! use lavanode::{config::{ManagerOptions, NodeOptions}, manager::NodeManager};
//!
//! let (manager, mut events) = NodeManager::new(ManagerOptions::new("123456789"))?;
//! let node = manager.create_node(NodeOptions::new("localhost"))?;
//! node.connect();
//!
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! ```

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use tokio::sync::mpsc;

use crate::{
    config::{ManagerOptions, NodeOptions},
    error::{Error, Result},
    events::Event,
    node::Node,
    player::{self, Player, SharedPlayer},
    protocol::rest::{PlayerOptions, TrackUpdate},
};

/// Operations a node asks a player to perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Starts the current track of the queue.
    Play,

    /// Stops the current track.
    Stop,

    /// Seeks the current track to a position.
    Seek(Duration),

    /// Destroys the player on its node and locally.
    Destroy,
}

/// Context handed to every node.
pub trait Manager: Send + Sync {
    fn options(&self) -> &ManagerOptions;

    /// Looks up the player of a guild.
    fn player(&self, guild_id: &str) -> Option<SharedPlayer>;

    /// Guild ids of the players bound to a node.
    fn players_on(&self, node: &str) -> Vec<String>;

    /// Forgets a node after it was destroyed.
    fn remove_node(&self, node: &str);

    /// Delivers a notification to consumers.
    fn emit(&self, event: Event);

    /// Asks the player of a guild to perform a command.
    fn command(&self, guild_id: &str, command: Command);
}

/// Registry of nodes and players.
pub struct NodeManager {
    options: ManagerOptions,
    nodes: Mutex<HashMap<String, Arc<Node>>>,
    players: Mutex<HashMap<String, SharedPlayer>>,
    events: mpsc::UnboundedSender<Event>,
    this: Weak<NodeManager>,
}

impl NodeManager {
    /// Creates a manager and the receiver of its notifications.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the options are invalid.
    pub fn new(options: ManagerOptions) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<Event>)> {
        let options = options.validate()?;
        let (events, receiver) = mpsc::unbounded_channel();

        let manager = Arc::new_cyclic(|this| Self {
            options,
            nodes: Mutex::new(HashMap::new()),
            players: Mutex::new(HashMap::new()),
            events,
            this: this.clone(),
        });

        Ok((manager, receiver))
    }

    /// Creates a node, or returns the existing node with the same
    /// identifier.
    ///
    /// Emits [`Event::NodeCreate`] only when a node was created.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the options are invalid.
    pub fn create_node(&self, options: NodeOptions) -> Result<Arc<Node>> {
        let identifier = options
            .identifier
            .clone()
            .unwrap_or_else(|| options.host.clone());

        let mut nodes = lock(&self.nodes);
        if let Some(node) = nodes.get(&identifier) {
            return Ok(Arc::clone(node));
        }

        let this: Weak<dyn Manager> = self.this.clone();
        let node = Node::new(options, this)?;
        nodes.insert(identifier.clone(), Arc::clone(&node));
        drop(nodes);

        debug!("created node {identifier}");
        self.emit(Event::NodeCreate { node: identifier });

        Ok(node)
    }

    /// Creates the player of a guild on a node, or returns the existing
    /// one.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if there is no node `node`.
    pub fn create_player(&self, guild_id: &str, node: &str) -> Result<SharedPlayer> {
        if self.node(node).is_none() {
            return Err(Error::not_found(format!("no node with identifier {node}")));
        }

        let mut players = lock(&self.players);
        let player = players
            .entry(guild_id.to_owned())
            .or_insert_with(|| Player::new(guild_id, node).shared());

        Ok(Arc::clone(player))
    }

    #[must_use]
    pub fn node(&self, identifier: &str) -> Option<Arc<Node>> {
        lock(&self.nodes).get(identifier).cloned()
    }

    #[must_use]
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        lock(&self.nodes).values().cloned().collect()
    }

    /// Destroys a node and forgets it, whether or not it is connected.
    ///
    /// The players bound to the node are destroyed on the backend before
    /// the node is removed.
    pub fn destroy_node(&self, identifier: &str) {
        if let Some(node) = self.node(identifier) {
            node.teardown();
        }
    }

    /// Builds the player update for a command.
    fn player_options(player: &Player, command: Command) -> Option<PlayerOptions> {
        let options = match command {
            Command::Play => {
                let Some(track) = player.queue.current.as_ref() else {
                    warn!("{} has nothing to play", player.guild_id);
                    return None;
                };
                PlayerOptions {
                    track: Some(TrackUpdate {
                        encoded: Some(track.encoded.clone()),
                    }),
                    ..PlayerOptions::default()
                }
            }
            Command::Stop => PlayerOptions {
                track: Some(TrackUpdate { encoded: None }),
                ..PlayerOptions::default()
            },
            Command::Seek(position) => PlayerOptions {
                position: Some(u64::try_from(position.as_millis()).unwrap_or(u64::MAX)),
                ..PlayerOptions::default()
            },
            Command::Destroy => return None,
        };

        Some(options)
    }

    fn destroy_player(&self, guild_id: &str) {
        let Some(player) = lock(&self.players).remove(guild_id) else {
            return;
        };

        let node = {
            let mut player = player::lock(&player);
            player.cancel_position_clock();
            player.node.clone()
        };

        let Some(node) = self.node(&node) else {
            return;
        };

        // Without a session the destroy goes over the websocket. It is
        // queued right away so that it is written before the node closes
        // the socket when it is being destroyed itself.
        if node.session_id().is_none() {
            if let Err(e) = node.destroy_player_over_socket(guild_id) {
                node.report(e);
            }
            return;
        }

        let guild_id = guild_id.to_owned();
        tokio::spawn(async move {
            if let Err(e) = node.destroy_player(&guild_id).await {
                node.report(e);
            }
        });
    }
}

impl Manager for NodeManager {
    fn options(&self) -> &ManagerOptions {
        &self.options
    }

    fn player(&self, guild_id: &str) -> Option<SharedPlayer> {
        lock(&self.players).get(guild_id).cloned()
    }

    fn players_on(&self, node: &str) -> Vec<String> {
        lock(&self.players)
            .iter()
            .filter(|(_, player)| player::lock(player).node == node)
            .map(|(guild_id, _)| guild_id.clone())
            .collect()
    }

    fn remove_node(&self, node: &str) {
        lock(&self.nodes).remove(node);
    }

    fn emit(&self, event: Event) {
        trace!("emitting {event:?}");
        if self.events.send(event).is_err() {
            trace!("no receiver for events");
        }
    }

    fn command(&self, guild_id: &str, command: Command) {
        if command == Command::Destroy {
            self.destroy_player(guild_id);
            return;
        }

        let Some(player) = self.player(guild_id) else {
            return;
        };
        let (node, options) = {
            let player = player::lock(&player);
            let Some(options) = Self::player_options(&player, command) else {
                return;
            };
            (player.node.clone(), options)
        };

        let Some(node) = self.node(&node) else {
            warn!("node {node} of {guild_id} is gone");
            return;
        };
        let guild_id = guild_id.to_owned();
        tokio::spawn(async move {
            if let Err(e) = node.update_player(&guild_id, &options, false).await {
                node.report(e);
            }
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
