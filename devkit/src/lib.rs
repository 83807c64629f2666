/*!
# Backwatch DevKit - Fixtures et utilitaires de test

Bibliothèque facilitant les tests du moteur de corrélation avec:
- Builders d'entrées brutes (invités, snapshots, sauvegardes, tâches)
- Harness à horloge figée autour de `CorrelationEngine`
*/

pub mod fixtures;
pub mod test_utils;

pub use fixtures::{
    archive_snapshot, archive_task, guest, guest_snapshot, hypervisor_task, storage_backup, InputBuilder,
};
pub use test_utils::{TestHarness, DAY, DEFAULT_NOW};
