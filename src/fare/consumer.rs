//! Debounced fare state for one display surface.
//!
//! A `FareConsumer` owns a background task that turns a stream of request
//! changes into fare states:
//!
//! ```ignore
//! let consumer = engine.consumer();
//! consumer.set_request(FareRequest::new("sedan", TripType::Local, 0.0));
//!
//! let mut state = consumer.watch();
//! state.wait_for(FareState::is_ready).await?;
//! ```
//!
//! Rapid changes are coalesced: only the last request seen within the
//! debounce delay is resolved. Fares resolved elsewhere for the same key are
//! picked up from `fare-updated`, and `cache-cleared` triggers a re-resolve.

use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::event::{EventKind, FareEvent, FareEventBus, Subscription};

use super::resolver::FareResolver;
use super::types::{FareRequest, FareSource};

/// What a surface should display
#[derive(Debug, Clone, PartialEq)]
pub enum FareState {
  /// No request set yet
  Idle,
  /// Waiting for the debounce delay or the resolver
  Loading,
  /// A fare is available
  Ready { fare: u32, source: FareSource },
  /// The request could not be resolved
  Error(String),
}

impl FareState {
  pub fn is_loading(&self) -> bool {
    matches!(self, FareState::Loading)
  }

  pub fn is_ready(&self) -> bool {
    matches!(self, FareState::Ready { .. })
  }

  pub fn is_error(&self) -> bool {
    matches!(self, FareState::Error(_))
  }

  pub fn fare(&self) -> Option<u32> {
    match self {
      FareState::Ready { fare, .. } => Some(*fare),
      _ => None,
    }
  }
}

#[derive(Debug)]
enum Command {
  Update(FareRequest),
  Refresh { force: bool },
  Pushed {
    key: String,
    price: u32,
    source: FareSource,
  },
}

/// Handle to a debounced resolution task.
///
/// Dropping the consumer stops the task and detaches it from the bus.
pub struct FareConsumer {
  commands: mpsc::UnboundedSender<Command>,
  state: watch::Receiver<FareState>,
  _subscriptions: Vec<Subscription>,
  task: JoinHandle<()>,
}

impl FareConsumer {
  pub fn new(resolver: FareResolver, bus: &FareEventBus, debounce: Duration) -> Self {
    let (commands, receiver) = mpsc::unbounded_channel();
    let (state_tx, state) = watch::channel(FareState::Idle);

    let updates = commands.clone();
    let on_update = bus.subscribe(EventKind::FareUpdated, move |event| {
      if let FareEvent::FareUpdated {
        key, price, source, ..
      } = event
      {
        let _ = updates.send(Command::Pushed {
          key: key.clone(),
          price: *price,
          source: *source,
        });
      }
    });

    let clears = commands.clone();
    let on_clear = bus.subscribe(EventKind::CacheCleared, move |event| {
      if let FareEvent::CacheCleared { force_refresh, .. } = event {
        let _ = clears.send(Command::Refresh {
          force: *force_refresh,
        });
      }
    });

    let worker = Worker {
      resolver,
      state: state_tx,
      current: None,
    };
    let task = tokio::spawn(worker.run(receiver, debounce));

    Self {
      commands,
      state,
      _subscriptions: vec![on_update, on_clear],
      task,
    }
  }

  /// Replace the request. Resolution starts once changes settle.
  pub fn set_request(&self, request: FareRequest) {
    let _ = self.commands.send(Command::Update(request));
  }

  /// Re-resolve the current request bypassing the caches.
  pub fn refresh(&self) {
    let _ = self.commands.send(Command::Refresh { force: true });
  }

  pub fn state(&self) -> FareState {
    self.state.borrow().clone()
  }

  pub fn fare(&self) -> Option<u32> {
    self.state.borrow().fare()
  }

  /// Receiver that observes every state change.
  pub fn watch(&self) -> watch::Receiver<FareState> {
    self.state.clone()
  }
}

impl Drop for FareConsumer {
  fn drop(&mut self) {
    self.task.abort();
  }
}

struct Worker {
  resolver: FareResolver,
  state: watch::Sender<FareState>,
  /// Last resolved request and its rendered canonical key
  current: Option<(FareRequest, String)>,
}

impl Worker {
  async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, debounce: Duration) {
    let mut pending: Option<FareRequest> = None;
    let delay = tokio::time::sleep(debounce);
    tokio::pin!(delay);

    loop {
      tokio::select! {
        command = commands.recv() => {
          let Some(command) = command else { break };
          match command {
            Command::Update(request) => {
              trace!(?request, "Request changed");
              pending = Some(request);
              delay.as_mut().reset(Instant::now() + debounce);
              self.state.send_replace(FareState::Loading);
            }
            Command::Refresh { force } => {
              // A pending change will resolve anyway
              if pending.is_none() {
                if let Some((request, _)) = self.current.clone() {
                  self.resolve(request, force).await;
                }
              }
            }
            Command::Pushed { key, price, source } => self.apply_push(&key, price, source),
          }
        }
        () = &mut delay, if pending.is_some() => {
          if let Some(request) = pending.take() {
            self.resolve(request, false).await;
          }
        }
      }
    }
  }

  async fn resolve(&mut self, request: FareRequest, force: bool) {
    let key = match self.resolver.key_for(&request) {
      Ok(key) => key.to_string(),
      Err(e) => {
        self.current = None;
        self.state.send_replace(FareState::Error(e.to_string()));
        return;
      }
    };
    self.current = Some((request.clone(), key));

    if !self.state.borrow().is_ready() {
      self.state.send_replace(FareState::Loading);
    }

    let request = if force { request.forced() } else { request };
    match self.resolver.resolve_entry(&request).await {
      Ok(entry) => {
        self.state.send_replace(FareState::Ready {
          fare: entry.fare,
          source: entry.source,
        });
      }
      Err(e) => {
        debug!(error = %e, "Fare resolution failed");
        self.state.send_replace(FareState::Error(e.to_string()));
      }
    }
  }

  fn apply_push(&mut self, key: &str, price: u32, source: FareSource) {
    let Some((_, current)) = &self.current else {
      return;
    };
    if current != key {
      return;
    }
    // A confirmed fare outranks anything resolved later
    if matches!(
      *self.state.borrow(),
      FareState::Ready {
        source: FareSource::Validated,
        ..
      }
    ) {
      return;
    }
    trace!(key, price, "Fare pushed from another resolution");
    self.state.send_replace(FareState::Ready {
      fare: price,
      source,
    });
  }
}
