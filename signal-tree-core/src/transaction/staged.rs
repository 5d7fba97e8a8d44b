//! Staged transactions.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::command::SignalCommand;
use crate::error::SignalError;
use crate::operation::SignalOperation;
use crate::tree::{
    Aspect, CommandResult, Data, GenerationSnapshot, Id, ResultCollector, SignalTree, TreeGuard,
    TreeRevision,
};

use super::Transaction;

/// Receives the result of one command and the results of everything that
/// was applied together with it.
pub(crate) type ResultCallback = Box<dyn FnOnce(&CommandResult, &ResultCollector)>;

/// Everything a transaction has done to one tree.
struct TreeStage {
    tree: SignalTree,
    /// Snapshot taken when the tree joined, with staged commands applied.
    revision: TreeRevision,
    /// Node generations as of the snapshot.
    generations: GenerationSnapshot,
    commands: Vec<SignalCommand>,
    callbacks: Vec<(Id, ResultCallback)>,
    read_conditions: HashSet<Id>,
}

impl TreeStage {
    fn new(tree: &SignalTree) -> Self {
        let (revision, generations) = tree.snapshot_with_generations();
        Self {
            tree: tree.clone(),
            revision,
            generations,
            commands: Vec::new(),
            callbacks: Vec::new(),
            read_conditions: HashSet::new(),
        }
    }

    fn stage(&mut self, command: SignalCommand) {
        // Results against the snapshot only shape what later reads see; the
        // real outcome is decided at commit.
        self.revision.apply(&command);
        self.commands.push(command);
    }

    fn resolve(self, transaction_result: &CommandResult, results: &ResultCollector) {
        for (id, callback) in self.callbacks {
            match results.get(&id) {
                Some(result) => callback(result, results),
                None => callback(transaction_result, results),
            }
        }
    }
}

/// A transaction that collects commands and applies them when it ends.
///
/// Reads inside the transaction see the tree as it was when the tree first
/// took part, plus the transaction's own commands. At commit all commands
/// for a tree are applied as one [`SignalCommand::Transaction`]; reads made
/// through `value()` add conditions that fail the commit if the node was
/// changed by someone else in the meantime.
#[derive(Default)]
pub(crate) struct StagedTransaction {
    stages: Vec<TreeStage>,
    rejection: Option<SignalError>,
}

impl StagedTransaction {
    fn stage_mut(&mut self, tree: &SignalTree) -> &mut TreeStage {
        let index = match self.stages.iter().position(|stage| stage.tree == *tree) {
            Some(index) => index,
            None => {
                self.stages.push(TreeStage::new(tree));
                self.stages.len() - 1
            }
        };
        &mut self.stages[index]
    }

    pub(crate) fn read(&mut self, tree: &SignalTree, id: Id) -> Option<Arc<Data>> {
        self.stage_mut(tree).revision.data(id).cloned()
    }

    pub(crate) fn include(
        &mut self,
        tree: &SignalTree,
        command: SignalCommand,
        callback: ResultCallback,
    ) {
        let stage = self.stage_mut(tree);
        stage.callbacks.push((command.command_id(), callback));
        stage.stage(command);
    }

    /// Read a node and make the commit depend on it staying as it was.
    pub(crate) fn tracked_read(
        &mut self,
        tree: &SignalTree,
        id: Id,
        aspect: Aspect,
    ) -> (Option<Arc<Data>>, Option<u64>) {
        let stage = self.stage_mut(tree);
        let data = stage.revision.data(id).cloned();
        if let Some(data) = &data {
            if stage.read_conditions.insert(id) {
                stage.stage(SignalCommand::last_update_condition(id, data.last_update));
            }
        }
        (data, stage.generations.get(id, aspect))
    }

    /// Fail the whole transaction regardless of what the trees say.
    pub(crate) fn reject(&mut self, error: SignalError) {
        self.rejection.get_or_insert(error);
    }

    /// Apply everything, either to the trees or to the enclosing transaction.
    pub(crate) fn commit(self, parent: Transaction) -> SignalOperation<()> {
        let operation = SignalOperation::new();

        if let Some(error) = self.rejection {
            warn!(%error, "transaction rejected before commit");
            if let Transaction::Staged(parent) = &parent {
                parent.borrow_mut().reject(error.clone());
            }
            let result = CommandResult::Reject(error.clone());
            for stage in self.stages {
                stage.resolve(&result, &ResultCollector::new());
            }
            operation.complete(Err(error));
            return operation;
        }

        let stages: Vec<TreeStage> = self
            .stages
            .into_iter()
            .filter(|stage| !stage.commands.is_empty())
            .collect();

        if stages.is_empty() {
            operation.complete(Ok(()));
            return operation;
        }

        match parent {
            Transaction::Staged(parent) => commit_into(stages, &parent, &operation),
            Transaction::Root => commit_to_trees(stages, &operation),
        }

        operation
    }
}

/// Hand the staged commands to an enclosing transaction.
fn commit_into(
    stages: Vec<TreeStage>,
    parent: &Rc<RefCell<StagedTransaction>>,
    operation: &SignalOperation<()>,
) {
    let outcome = Rc::new(RefCell::new(Outcome::new(stages.len(), operation.clone())));

    for mut stage in stages {
        let commands = std::mem::take(&mut stage.commands);
        let command = SignalCommand::transaction(commands);
        let tree = stage.tree.clone();
        let outcome = Rc::clone(&outcome);

        parent.borrow_mut().include(
            &tree,
            command,
            Box::new(move |result: &CommandResult, results: &ResultCollector| {
                stage.resolve(result, results);
                outcome.borrow_mut().report(result);
            }),
        );
    }
}

/// Apply the staged commands, all trees or none.
fn commit_to_trees(mut stages: Vec<TreeStage>, operation: &SignalOperation<()>) {
    stages.sort_by_key(|stage| stage.tree.tree_id());
    let commands: Vec<SignalCommand> = stages
        .iter_mut()
        .map(|stage| SignalCommand::transaction(std::mem::take(&mut stage.commands)))
        .collect();
    let trees: Vec<SignalTree> = stages.iter().map(|stage| stage.tree.clone()).collect();

    let mut applied: Vec<(CommandResult, ResultCollector)> = Vec::with_capacity(stages.len());
    {
        let mut guards: Vec<TreeGuard<'_>> = trees.iter().map(SignalTree::lock).collect();

        let failure = if guards.len() > 1 {
            guards
                .iter_mut()
                .zip(&commands)
                .map(|(guard, command)| guard.dry_run(command))
                .enumerate()
                .find(|(_, (result, _))| !result.is_accepted())
        } else {
            None
        };

        match failure {
            Some((failed_index, (result, results))) => {
                for index in 0..guards.len() {
                    if index == failed_index {
                        applied.push((result.clone(), results.clone()));
                    } else {
                        applied.push((result.clone(), ResultCollector::new()));
                    }
                }
            }
            None => {
                for (guard, command) in guards.iter_mut().zip(&commands) {
                    applied.push(guard.apply(command));
                }
            }
        }
        // Observers may read any of the trees, so unlock all before any
        // guard notifies.
        guards.iter_mut().for_each(TreeGuard::release);
    }

    let mut first_error = None;
    for (stage, (result, results)) in stages.into_iter().zip(applied) {
        if let CommandResult::Reject(error) = &result {
            first_error.get_or_insert_with(|| error.clone());
        }
        stage.resolve(&result, &results);
    }

    match first_error {
        Some(error) => {
            warn!(%error, trees = trees.len(), "transaction failed at commit");
            operation.complete(Err(error));
        }
        None => {
            debug!(trees = trees.len(), "transaction committed");
            operation.complete(Ok(()));
        }
    }
}

/// Collects the stage results of a nested transaction.
struct Outcome {
    remaining: usize,
    error: Option<SignalError>,
    operation: SignalOperation<()>,
}

impl Outcome {
    fn new(remaining: usize, operation: SignalOperation<()>) -> Self {
        Self {
            remaining,
            error: None,
            operation,
        }
    }

    fn report(&mut self, result: &CommandResult) {
        if let CommandResult::Reject(error) = result {
            self.error.get_or_insert_with(|| error.clone());
        }

        self.remaining -= 1;
        if self.remaining == 0 {
            match self.error.take() {
                Some(error) => self.operation.complete(Err(error)),
                None => self.operation.complete(Ok(())),
            }
        }
    }
}
