#![forbid(unsafe_code)]

//! Reverse-mode gradient pass over the reference graph.
//!
//! Cotangents are seeded at the outputs and accumulated across the nodes
//! between targets and outputs in reverse topological order; the gradient
//! expressions land in the same graph as new nodes. Gather propagates an
//! indexed cotangent, everything else stays dense. Non-floating outputs are
//! treated as constants and contribute nothing.

use fg_core::contract::{Cotangent, IndexedCotangent};
use fg_core::Literal;
use rustc_hash::FxHashMap;

use crate::graph::{Graph, GraphError, NodeId, Op};

fn densify(graph: &mut Graph, cotangent: &Cotangent<NodeId>) -> Result<NodeId, GraphError> {
    match cotangent {
        Cotangent::Dense(node) => Ok(*node),
        Cotangent::Indexed(indexed) => {
            graph.scatter_add(indexed.values, indexed.indices, indexed.dense_shape.clone())
        }
    }
}

fn combine(
    graph: &mut Graph,
    mut parts: Vec<Cotangent<NodeId>>,
) -> Result<Cotangent<NodeId>, GraphError> {
    if parts.len() == 1 {
        return Ok(parts.remove(0));
    }
    let mut acc = densify(graph, &parts[0])?;
    for part in &parts[1..] {
        let dense = densify(graph, part)?;
        acc = graph.add(acc, dense)?;
    }
    Ok(Cotangent::Dense(acc))
}

/// Reduce a dense cotangent back to an operand's shape when the operand was
/// a scalar broadcast across the operation.
fn reduce_like(graph: &mut Graph, cotangent: NodeId, operand: NodeId) -> Result<NodeId, GraphError> {
    let cotangent_scalar = graph.node(cotangent)?.shape.is_scalar();
    let operand_scalar = graph.node(operand)?.shape.is_scalar();
    if operand_scalar && !cotangent_scalar {
        graph.sum(cotangent)
    } else {
        Ok(cotangent)
    }
}

fn resolve_seeds(
    graph: &mut Graph,
    outputs: &[NodeId],
    seeds: Option<&[NodeId]>,
) -> Result<Vec<NodeId>, GraphError> {
    match seeds {
        None => outputs
            .iter()
            .map(|output| {
                let node = graph.node(*output)?.clone();
                Ok(graph.fill(node.shape, Literal::one_of(node.dtype)))
            })
            .collect(),
        Some(seeds) => {
            if seeds.len() != outputs.len() {
                return Err(GraphError::SeedArity {
                    expected: outputs.len(),
                    actual: seeds.len(),
                });
            }
            outputs
                .iter()
                .zip(seeds.iter())
                .enumerate()
                .map(|(index, (output, seed))| {
                    let output_shape = graph.node(*output)?.shape.clone();
                    let seed_shape = graph.node(*seed)?.shape.clone();
                    if seed_shape == output_shape {
                        Ok(*seed)
                    } else if seed_shape.is_scalar() {
                        graph.broadcast(*seed, output_shape)
                    } else {
                        Err(GraphError::SeedShape {
                            index,
                            output: output_shape,
                            seed: seed_shape,
                        })
                    }
                })
                .collect()
        }
    }
}

/// Nodes that both feed some output and are fed by some target. Cotangents
/// only flow through this set; everything outside it is provably zero.
fn between_set(
    graph: &Graph,
    outputs: &[NodeId],
    targets: &[NodeId],
    frontier: usize,
) -> Vec<bool> {
    let mut forward = vec![false; frontier];
    for target in targets {
        if target.index() < frontier {
            forward[target.index()] = true;
        }
    }
    for index in 0..frontier {
        if forward[index] {
            continue;
        }
        let node = match graph.node(NodeId(index as u32)) {
            Ok(node) => node,
            Err(_) => continue,
        };
        if node.inputs.iter().any(|input| forward[input.index()]) {
            forward[index] = true;
        }
    }

    let mut backward = vec![false; frontier];
    let mut stack: Vec<NodeId> = outputs
        .iter()
        .copied()
        .filter(|id| id.index() < frontier)
        .collect();
    while let Some(id) = stack.pop() {
        if backward[id.index()] {
            continue;
        }
        backward[id.index()] = true;
        if let Ok(node) = graph.node(id) {
            stack.extend(node.inputs.iter().copied());
        }
    }

    (0..frontier)
        .map(|index| forward[index] && backward[index])
        .collect()
}

pub(crate) fn reverse_gradients(
    graph: &mut Graph,
    outputs: &[NodeId],
    targets: &[NodeId],
    seeds: Option<&[NodeId]>,
) -> Result<Vec<Option<Cotangent<NodeId>>>, GraphError> {
    for id in outputs.iter().chain(targets.iter()) {
        graph.node(*id)?;
    }
    let seeds = resolve_seeds(graph, outputs, seeds)?;

    // Gradient nodes appended from here on are results, never revisited.
    let frontier = graph.node_count();
    let between = between_set(graph, outputs, targets, frontier);

    let mut pending: FxHashMap<NodeId, Vec<Cotangent<NodeId>>> = FxHashMap::default();
    for (output, seed) in outputs.iter().zip(seeds.iter()) {
        if !between[output.index()] {
            continue;
        }
        if !graph.node(*output)?.dtype.is_floating() {
            continue;
        }
        pending
            .entry(*output)
            .or_default()
            .push(Cotangent::Dense(*seed));
    }

    let mut settled: FxHashMap<NodeId, Cotangent<NodeId>> = FxHashMap::default();

    for index in (0..frontier).rev() {
        let id = NodeId(index as u32);
        if !between[index] {
            continue;
        }
        let Some(parts) = pending.remove(&id) else {
            continue;
        };
        let combined = combine(graph, parts)?;
        settled.insert(id, combined.clone());

        let node = graph.node(id)?.clone();
        let push = |pending: &mut FxHashMap<NodeId, Vec<Cotangent<NodeId>>>,
                        input: NodeId,
                        cotangent: Cotangent<NodeId>| {
            pending.entry(input).or_default().push(cotangent);
        };

        match node.op {
            Op::Identity => {
                let input = node.inputs[0];
                if between[input.index()] {
                    // Control dependencies stay on the identity itself; the
                    // cotangent passes through untouched.
                    push(&mut pending, input, combined);
                }
            }
            Op::Add => {
                let dense = densify(graph, &combined)?;
                for input in [node.inputs[0], node.inputs[1]] {
                    if between[input.index()] {
                        let reduced = reduce_like(graph, dense, input)?;
                        push(&mut pending, input, Cotangent::Dense(reduced));
                    }
                }
            }
            Op::Sub => {
                let dense = densify(graph, &combined)?;
                let lhs = node.inputs[0];
                if between[lhs.index()] {
                    let reduced = reduce_like(graph, dense, lhs)?;
                    push(&mut pending, lhs, Cotangent::Dense(reduced));
                }
                let rhs = node.inputs[1];
                if between[rhs.index()] {
                    let negated = graph.neg(dense)?;
                    let reduced = reduce_like(graph, negated, rhs)?;
                    push(&mut pending, rhs, Cotangent::Dense(reduced));
                }
            }
            Op::Mul => {
                let dense = densify(graph, &combined)?;
                let lhs = node.inputs[0];
                let rhs = node.inputs[1];
                if between[lhs.index()] {
                    let scaled = graph.mul(dense, rhs)?;
                    let reduced = reduce_like(graph, scaled, lhs)?;
                    push(&mut pending, lhs, Cotangent::Dense(reduced));
                }
                if between[rhs.index()] {
                    let scaled = graph.mul(dense, lhs)?;
                    let reduced = reduce_like(graph, scaled, rhs)?;
                    push(&mut pending, rhs, Cotangent::Dense(reduced));
                }
            }
            Op::Neg => {
                let dense = densify(graph, &combined)?;
                let input = node.inputs[0];
                if between[input.index()] {
                    let negated = graph.neg(dense)?;
                    push(&mut pending, input, Cotangent::Dense(negated));
                }
            }
            Op::Sin => {
                let dense = densify(graph, &combined)?;
                let input = node.inputs[0];
                if between[input.index()] {
                    let derivative = graph.cos(input)?;
                    let scaled = graph.mul(dense, derivative)?;
                    push(&mut pending, input, Cotangent::Dense(scaled));
                }
            }
            Op::Cos => {
                let dense = densify(graph, &combined)?;
                let input = node.inputs[0];
                if between[input.index()] {
                    let derivative = graph.sin(input)?;
                    let scaled = graph.mul(dense, derivative)?;
                    let negated = graph.neg(scaled)?;
                    push(&mut pending, input, Cotangent::Dense(negated));
                }
            }
            Op::Exp => {
                let dense = densify(graph, &combined)?;
                let input = node.inputs[0];
                if between[input.index()] {
                    // exp is its own derivative; reuse the forward node.
                    let scaled = graph.mul(dense, id)?;
                    push(&mut pending, input, Cotangent::Dense(scaled));
                }
            }
            Op::Sum => {
                let dense = densify(graph, &combined)?;
                let input = node.inputs[0];
                if between[input.index()] {
                    let input_shape = graph.node(input)?.shape.clone();
                    let spread = graph.broadcast(dense, input_shape)?;
                    push(&mut pending, input, Cotangent::Dense(spread));
                }
            }
            Op::Broadcast => {
                let dense = densify(graph, &combined)?;
                let input = node.inputs[0];
                if between[input.index()] {
                    let reduced = graph.sum(dense)?;
                    push(&mut pending, input, Cotangent::Dense(reduced));
                }
            }
            Op::Gather => {
                let dense = densify(graph, &combined)?;
                let source = node.inputs[0];
                let indices = node.inputs[1];
                if between[source.index()] {
                    let dense_shape = graph.node(source)?.shape.clone();
                    push(
                        &mut pending,
                        source,
                        Cotangent::Indexed(IndexedCotangent {
                            values: dense,
                            indices,
                            dense_shape,
                        }),
                    );
                }
            }
            Op::ScatterAdd => {
                let dense = densify(graph, &combined)?;
                let values = node.inputs[0];
                let indices = node.inputs[1];
                if between[values.index()] {
                    let sliced = graph.gather(dense, indices)?;
                    push(&mut pending, values, Cotangent::Dense(sliced));
                }
            }
            Op::Placeholder { .. }
            | Op::Constant(_)
            | Op::Fill { .. }
            | Op::AssertFail { .. } => {}
        }
    }

    Ok(targets.iter().map(|id| settled.get(id).cloned()).collect())
}
