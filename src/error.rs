// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! The configuration-fatal error taxonomy and the `fatal!`
//! logging-and-exit helper. Everything else in the crate uses
//! [anyhow::Result] and is logged, not propagated, at the dispatch boundary.

use thiserror::Error;

/// Errors that make the engine's configuration impossible to run safely.
/// Each of these is unrecoverable: the process terminates rather than
/// continuing in an inconsistent state.
#[derive(Error, Debug)]
pub enum EngineError {
    /// More than one [crate::engine::Engine] was constructed in this process.
    #[error("an Engine already exists in this process")]
    DuplicateEngine,

    /// Two modules were registered with the same name under the same parent.
    #[error("duplicate module name: {0}")]
    DuplicateModule(String),

    /// Two modules claimed the same `(protocol, port)` pair.
    #[error("port collision on protocol {protocol}, port {port}")]
    PortCollision {
        /// The protocol tag that collided.
        protocol: String,
        /// The port, socket path, or URL that collided.
        port: String,
    },

    /// A submodule's `parent` pointer, captured at construction, doesn't
    /// match the module it was added to.
    #[error("module '{child}' was constructed with a different parent than '{parent}'")]
    ParentChildMismatch {
        /// The module that was being added to.
        parent: String,
        /// The submodule whose parent pointer disagreed.
        child: String,
    },

    /// A module or scene name contained `*` or `[`, which are reserved for
    /// wildcard matching.
    #[error("name '{0}' contains a forbidden character ('*' or '[')")]
    ForbiddenName(String),

    /// The external transport collaborator could not be created.
    #[error("failed to create transport: {0}")]
    TransportCreation(String),
}

/// Logs `err` as a configuration-fatal failure (with a captured backtrace)
/// and terminates the process. Used for setup errors the engine has no
/// reasonable way to recover from at runtime — a duplicate module name,
/// a port collision — as opposed to transient or user-input errors, which
/// are logged and otherwise ignored.
pub fn fatal(err: impl Into<anyhow::Error>) -> ! {
    let err = err.into();
    tracing::error!(backtrace = %err.backtrace(), "configuration-fatal error: {err:#}");
    std::process::exit(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_descriptive() {
        let err = EngineError::ForbiddenName("foo*bar".to_string());
        assert_eq!(
            err.to_string(),
            "name 'foo*bar' contains a forbidden character ('*' or '[')"
        );
    }
}
