//-
// Copyright (c) 2020, the ocmigrate authors
//
// This file is part of ocmigrate.
//
// Ocmigrate is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Ocmigrate is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// ocmigrate. If not, see <http://www.gnu.org/licenses/>.

//! The in-memory model of one mailbox's folder hierarchy.
//!
//! Built top-down by the estimate walk and reused by export. Nodes live in
//! an arena and refer to each other by index; traversal is always top-down,
//! so children are an ordered list owned by the parent and no sibling links
//! are needed.

use serde::{Deserialize, Serialize};

pub type NodeIx = usize;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FolderNode {
    /// Store-side folder identifier.
    pub id: u64,
    /// Display name.
    pub name: String,
    /// Slash-separated path from the mailbox root, for logging.
    pub path: String,
    pub parent: Option<NodeIx>,
    pub children: Vec<NodeIx>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FolderTree {
    nodes: Vec<FolderNode>,
}

impl FolderTree {
    /// Create a tree holding only the mailbox root.
    pub fn new(root_id: u64, root_name: &str) -> Self {
        FolderTree {
            nodes: vec![FolderNode {
                id: root_id,
                name: root_name.to_owned(),
                path: "/".to_owned(),
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    pub fn root(&self) -> NodeIx {
        0
    }

    /// Append a child under `parent`, returning the new node's index.
    pub fn add_child(
        &mut self,
        parent: NodeIx,
        id: u64,
        name: &str,
    ) -> NodeIx {
        let path = if "/" == self.nodes[parent].path {
            format!("/{}", name)
        } else {
            format!("{}/{}", self.nodes[parent].path, name)
        };
        let ix = self.nodes.len();
        self.nodes.push(FolderNode {
            id,
            name: name.to_owned(),
            path,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent].children.push(ix);
        ix
    }

    pub fn node(&self, ix: NodeIx) -> &FolderNode {
        &self.nodes[ix]
    }

    /// The child indices of `ix`, in discovery order.
    pub fn children(&self, ix: NodeIx) -> Vec<NodeIx> {
        self.nodes[ix].children.clone()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
