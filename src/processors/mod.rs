//! Copyright © 2025-2026 Wenze Wei. All Rights Reserved.
//!
//! This file is part of Zi.
//! The Zi project belongs to the Dunimd Team.
//!
//! Licensed under the Apache License, Version 2.0 (the "License");
//! You may not use this file except in compliance with the License.
//! You may obtain a copy of the License at
//!
//!     http://www.apache.org/licenses/LICENSE-2.0
//!
//! Unless required by applicable law or agreed to in writing, software
//! distributed under the License is distributed on an "AS IS" BASIS,
//! WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//! See the License for the specific language governing permissions and
//! limitations under the License.

//! # Processors Module
//!
//! Row transformations a pipeline definition may chain after its source.
//!
//! - **limit**: stop after `count` rows
//! - **offset**: skip the first `offset` rows
//! - **filter**: keep rows whose column compares to a literal
//! - **field**: `map` relabels columns, `without` drops them
//! - **sort**: order by columns, spilling to disk past a memory budget
//!
//! Processors are created through factory functions registered by name on
//! the [`ZiPipelineExecutor`](crate::executor::ZiPipelineExecutor).

pub mod field;
pub mod filter;
pub mod limit;
pub mod offset;
pub mod sort;
