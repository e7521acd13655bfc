// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 FlowForge Contributors
//
// This file is part of FlowForge.
//
// FlowForge is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// FlowForge is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with FlowForge. If not, see <https://www.gnu.org/licenses/>.

//! Lock manager error types.

/// Lock operation failure.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Acquisition was abandoned because the caller cancelled
    #[error("lock acquisition cancelled for '{0}'")]
    Cancelled(String),

    /// Backing store failure
    #[error("lock backend error: {0}")]
    Backend(String),
}

/// Result alias for lock operations.
pub type LockResult<T> = Result<T, LockError>;
