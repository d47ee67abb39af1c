use super::metrics::Evaluation;

pub fn print_evaluation(model: &str, eval: &Evaluation) {
    println!("\nEvaluation: {model}");
    println!("{:-<40}", "");
    println!("{:<12} {:>10.4}", "Accuracy", eval.accuracy);
    println!("{:<12} {:>10.4}", "Precision", eval.precision);
    println!("{:<12} {:>10.4}", "Recall", eval.recall);
    println!("{:<12} {:>10.4}", "F1 Score", eval.f1);
    println!("{:<12} {:>10.4}", "ROC AUC", eval.roc_auc);
    println!("\nConfusion Matrix:");
    print!("{}", eval.confusion.to_string_table());
}

/// Side by side table, one row per model, in input order.
pub fn print_comparison(results: &[(String, Evaluation)]) {
    println!("\nModel Comparison");
    println!("================");
    println!("{:-<80}", "");
    println!(
        "{:<24} {:>10} {:>10} {:>10} {:>10} {:>10}",
        "Model", "Accuracy", "Precision", "Recall", "F1", "ROC AUC"
    );
    println!("{:-<80}", "");

    for (name, eval) in results {
        println!(
            "{:<24} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>10.4}",
            name, eval.accuracy, eval.precision, eval.recall, eval.f1, eval.roc_auc
        );
    }
    println!("{:-<80}", "");

    if let Some((best, eval)) = results
        .iter()
        .max_by(|a, b| a.1.roc_auc.total_cmp(&b.1.roc_auc))
    {
        println!("Best ROC AUC: {best} ({:.4})", eval.roc_auc);
    }
}
