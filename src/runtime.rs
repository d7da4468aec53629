//! The coordination loop.
//!
//! One thread owns the [`LocationProvider`] and drains the event queue,
//! waking early for the next timer deadline. Bus built-ins (`health`,
//! `stop`, `methods`) are answered here; every other method goes to the
//! provider.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::event::Event;
use crate::protocol::{methods, Request, Response};
use crate::provider::LocationProvider;
use crate::service::{overall_status, BusService, MethodInfo};

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

pub struct EventLoop {
    events: Receiver<Event>,
    provider: LocationProvider,
    started_at: Instant,
    started_at_wall: DateTime<Utc>,
    running: bool,
}

impl EventLoop {
    pub fn new(provider: LocationProvider, events: Receiver<Event>) -> Self {
        Self {
            events,
            provider,
            started_at: Instant::now(),
            started_at_wall: Utc::now(),
            running: true,
        }
    }

    pub fn provider(&self) -> &LocationProvider {
        &self.provider
    }

    pub fn provider_mut(&mut self) -> &mut LocationProvider {
        &mut self.provider
    }

    /// False once `stop` was called or a [`Event::Shutdown`] arrived.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Run until stopped, the idle timer fires or every sender is gone.
    /// The engine is released before returning.
    pub fn run(&mut self) {
        info!(service = self.provider.name(), "Coordination loop running");

        while self.running && !self.provider.should_quit() {
            let event = match self.provider.next_deadline() {
                Some(deadline) => {
                    let timeout = deadline.saturating_duration_since(Instant::now());
                    match self.events.recv_timeout(timeout) {
                        Ok(event) => Some(event),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match self.events.recv() {
                    Ok(event) => Some(event),
                    Err(_) => break,
                },
            };

            if let Some(event) = event {
                self.handle(event);
            }
            self.provider.fire_expired_timers(Instant::now());
        }

        self.provider.shutdown();
        info!(service = self.provider.name(), "Coordination loop stopped");
    }

    /// Process one event.
    pub fn handle(&mut self, event: Event) {
        match event {
            Event::MethodCall {
                peer,
                request,
                reply,
            } => {
                let response = self.call(Some(&peer), &request);
                if reply.send(response).is_err() {
                    debug!(peer, "Caller went away before the reply");
                }
            }
            Event::Shutdown => {
                info!("Shutdown requested");
                self.running = false;
            }
            other => self.provider.handle_event(other),
        }
    }

    /// Answer one request. `caller` is the bus identity of the peer.
    pub fn call(&mut self, caller: Option<&str>, request: &Request) -> Response {
        let start = Instant::now();
        match request.method.as_str() {
            methods::HEALTH => self.handle_health(&request.id, start),
            methods::STOP => {
                info!("Stop requested over the bus");
                self.running = false;
                Response::success(
                    &request.id,
                    json!({ "message": "Provider stopping" }),
                    elapsed_ms(start),
                )
            }
            methods::METHODS => self.handle_methods(&request.id, start),
            method => match self.provider.dispatch(caller, method, &request.params) {
                Ok(result) => Response::success(&request.id, result, elapsed_ms(start)),
                Err(e) => {
                    warn!(method, error = %e, "Method call failed");
                    Response::error(&request.id, e.code(), e.to_string(), elapsed_ms(start))
                }
            },
        }
    }

    fn handle_health(&self, id: &str, start: Instant) -> Response {
        let services = self.provider.health_check();
        Response::success(
            id,
            json!({
                "status": overall_status(&services),
                "pid": std::process::id(),
                "started_at": self.started_at_wall.to_rfc3339(),
                "version": self.provider.version(),
                "uptime_seconds": self.started_at.elapsed().as_secs(),
                "services": services,
            }),
            elapsed_ms(start),
        )
    }

    fn handle_methods(&self, id: &str, start: Instant) -> Response {
        let mut list = vec![
            MethodInfo::new(methods::HEALTH, "Returns provider health and status"),
            MethodInfo::new(methods::STOP, "Shuts the provider down"),
            MethodInfo::new(methods::METHODS, "Lists available methods"),
        ];
        list.extend(self.provider.method_list());
        Response::success(id, json!({ "methods": list }), elapsed_ms(start))
    }
}
